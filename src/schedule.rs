//! Read-only schedule tables backing validation and geometry resolution.
//!
//! The tables mirror the subset of a static GTFS dataset this tool needs:
//! stops, trip-to-shape assignments, stop-time sequences and shape points,
//! each keyed by identifier. Rows are sorted numerically at construction so
//! lookups return display-ready order.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StopRecord {
    pub lat: f64,
    pub lon: f64,
    /// Raw `location_type` value; blank means `"0"` (routable stop).
    pub location_type: String,
}

impl StopRecord {
    /// A stop is routable when its location type is absent, blank or `"0"`.
    pub fn is_routable(&self) -> bool {
        self.location_type.is_empty() || self.location_type == "0"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopTimeRecord {
    pub stop_sequence: u32,
    pub stop_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapePoint {
    pub sequence: u32,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// In-memory snapshot of the schedule tables, read-only once built.
#[derive(Debug, Default)]
pub struct ScheduleTables {
    stops: HashMap<String, StopRecord>,
    trip_shapes: HashMap<String, String>,
    stop_times: HashMap<String, Vec<StopTimeRecord>>,
    shapes: HashMap<String, Vec<ShapePoint>>,
}

impl ScheduleTables {
    pub fn stop(&self, stop_id: &str) -> Option<&StopRecord> {
        self.stops.get(stop_id)
    }

    pub fn shape_id_for_trip(&self, trip_id: &str) -> Option<&str> {
        self.trip_shapes.get(trip_id).map(String::as_str)
    }

    /// Stop times for a trip, ordered by `stop_sequence` ascending.
    pub fn stop_times_for_trip(&self, trip_id: &str) -> Option<&[StopTimeRecord]> {
        self.stop_times.get(trip_id).map(Vec::as_slice)
    }

    /// Shape points, ordered by point sequence ascending.
    pub fn shape_points(&self, shape_id: &str) -> Option<&[ShapePoint]> {
        self.shapes.get(shape_id).map(Vec::as_slice)
    }

    pub fn insert_stop(&mut self, stop_id: &str, lat: f64, lon: f64, location_type: &str) {
        self.stops.insert(
            stop_id.to_string(),
            StopRecord {
                lat,
                lon,
                location_type: location_type.to_string(),
            },
        );
    }

    pub fn insert_trip_shape(&mut self, trip_id: &str, shape_id: &str) {
        self.trip_shapes
            .insert(trip_id.to_string(), shape_id.to_string());
    }

    pub fn insert_stop_time(&mut self, trip_id: &str, stop_sequence: u32, stop_id: &str) {
        let times = self.stop_times.entry(trip_id.to_string()).or_default();
        times.push(StopTimeRecord {
            stop_sequence,
            stop_id: stop_id.to_string(),
        });
        times.sort_by_key(|st| st.stop_sequence);
    }

    pub fn insert_shape_point(&mut self, shape_id: &str, sequence: u32, lat: f64, lon: f64) {
        let points = self.shapes.entry(shape_id.to_string()).or_default();
        points.push(ShapePoint { sequence, lat, lon });
        points.sort_by_key(|p| p.sequence);
    }

    /// Loads schedule tables from a directory of extracted GTFS text files.
    ///
    /// Only `stops.txt`, `trips.txt`, `stop_times.txt` and `shapes.txt` are
    /// read; a missing file yields an empty table. Rows with unparseable
    /// numeric values are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns a [`ScheduleError`] if a present file cannot be read or is
    /// not valid CSV.
    pub fn from_dir(dir: &Path) -> Result<Self, ScheduleError> {
        let mut tables = ScheduleTables::default();

        for row in read_rows::<StopRow>(&dir.join("stops.txt"))? {
            let (Ok(lat), Ok(lon)) = (row.stop_lat.trim().parse(), row.stop_lon.trim().parse())
            else {
                warn!(stop_id = %row.stop_id, "skipping stop with unparseable coordinates");
                continue;
            };
            tables.stops.insert(
                row.stop_id,
                StopRecord {
                    lat,
                    lon,
                    location_type: row.location_type,
                },
            );
        }

        for row in read_rows::<TripRow>(&dir.join("trips.txt"))? {
            if !row.shape_id.is_empty() {
                tables.trip_shapes.insert(row.trip_id, row.shape_id);
            }
        }

        for row in read_rows::<StopTimeRow>(&dir.join("stop_times.txt"))? {
            let Ok(stop_sequence) = row.stop_sequence.trim().parse() else {
                warn!(trip_id = %row.trip_id, "skipping stop time with unparseable sequence");
                continue;
            };
            tables
                .stop_times
                .entry(row.trip_id)
                .or_default()
                .push(StopTimeRecord {
                    stop_sequence,
                    stop_id: row.stop_id,
                });
        }
        for times in tables.stop_times.values_mut() {
            times.sort_by_key(|st| st.stop_sequence);
        }

        for row in read_rows::<ShapeRow>(&dir.join("shapes.txt"))? {
            let (Ok(sequence), Ok(lat), Ok(lon)) = (
                row.shape_pt_sequence.trim().parse(),
                row.shape_pt_lat.trim().parse(),
                row.shape_pt_lon.trim().parse(),
            ) else {
                warn!(shape_id = %row.shape_id, "skipping unparseable shape point");
                continue;
            };
            tables
                .shapes
                .entry(row.shape_id)
                .or_default()
                .push(ShapePoint { sequence, lat, lon });
        }
        for points in tables.shapes.values_mut() {
            points.sort_by_key(|p| p.sequence);
        }

        debug!(
            stops = tables.stops.len(),
            trips = tables.trip_shapes.len(),
            stop_time_trips = tables.stop_times.len(),
            shapes = tables.shapes.len(),
            "schedule tables loaded"
        );
        Ok(tables)
    }
}

// Numeric columns are read as strings and parsed leniently, matching how
// GTFS producers pad or omit them.
#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_lat: String,
    #[serde(default)]
    stop_lon: String,
    #[serde(default)]
    location_type: String,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    trip_id: String,
    #[serde(default)]
    shape_id: String,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    #[serde(default)]
    stop_sequence: String,
    #[serde(default)]
    stop_id: String,
}

#[derive(Debug, Deserialize)]
struct ShapeRow {
    shape_id: String,
    #[serde(default)]
    shape_pt_lat: String,
    #[serde(default)]
    shape_pt_lon: String,
    #[serde(default)]
    shape_pt_sequence: String,
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, ScheduleError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|source| ScheduleError::Io {
        path: display.clone(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| ScheduleError::Csv {
            path: display,
            source,
        })
}
