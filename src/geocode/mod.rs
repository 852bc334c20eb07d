use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::common::error::Result;
use crate::domain::geo::Polygon;

/// The UGC zone kinds carried in alert geocodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UgcKind {
    County,
    PublicZone,
}

impl UgcKind {
    /// The kind code embedded in a UGC geocode key.
    pub fn code(self) -> char {
        match self {
            UgcKind::County => 'C',
            UgcKind::PublicZone => 'Z',
        }
    }
}

/// One zone record in a polygon dataset file.
#[derive(Debug, Deserialize)]
struct ZoneRecord {
    state: String,
    zone: String,
    points: Vec<[f64; 2]>,
}

/// Immutable lookup from UGC code (`state + kind + zone`) to polygon.
/// Built once before the pipeline starts and never mutated after.
#[derive(Debug, Default)]
pub struct GeocodeMap {
    polygons: HashMap<String, Polygon>,
}

impl GeocodeMap {
    pub fn new() -> GeocodeMap {
        GeocodeMap::default()
    }

    /// Loads a JSON polygon dataset for one UGC kind and merges it in.
    /// Ring vertex order is reversed from the dataset's ordering to
    /// satisfy the canonical winding convention. Returns the number of
    /// zones loaded.
    pub fn load(&mut self, path: &Path, kind: UgcKind) -> Result<usize> {
        let data = std::fs::read_to_string(path)?;
        let records: Vec<ZoneRecord> = serde_json::from_str(&data)?;
        let count = records.len();
        for record in records {
            let mut points = record.points;
            points.reverse();
            let key = format!("{}{}{}", record.state, kind.code(), record.zone);
            self.polygons.insert(key, Polygon(points));
        }
        Ok(count)
    }

    pub fn insert(&mut self, code: impl Into<String>, polygon: Polygon) {
        self.polygons.insert(code.into(), polygon);
    }

    pub fn get(&self, code: &str) -> Option<&Polygon> {
        self.polygons.get(code)
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}
