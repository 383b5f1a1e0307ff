//! WGS84 UTM zone labels to EPSG codes

use crate::types::{AtmoError, AtmoResult};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Hemisphere of a UTM zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

fn table() -> &'static HashMap<String, u32> {
    static TABLE: OnceLock<HashMap<String, u32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut codes = HashMap::with_capacity(120);
        for zone in 1..=60u32 {
            codes.insert(format!("WGS84UTM{}N", zone), 32600 + zone);
            codes.insert(format!("WGS84UTM{}S", zone), 32700 + zone);
        }
        codes
    })
}

/// Label used in the lookup table, e.g. "WGS84UTM33N"
pub fn utm_label(zone: u32, hemisphere: Hemisphere) -> String {
    let h = match hemisphere {
        Hemisphere::North => 'N',
        Hemisphere::South => 'S',
    };
    format!("WGS84UTM{}{}", zone, h)
}

/// EPSG code for a zone label
pub fn epsg_for_label(label: &str) -> AtmoResult<u32> {
    table()
        .get(label)
        .copied()
        .ok_or_else(|| AtmoError::InvalidFormat(format!("Unknown UTM zone label: {}", label)))
}

/// EPSG code for a zone number and hemisphere
pub fn utm_epsg(zone: u32, hemisphere: Hemisphere) -> AtmoResult<u32> {
    epsg_for_label(&utm_label(zone, hemisphere))
}

/// Number of known labels
pub fn label_count() -> usize {
    table().len()
}
