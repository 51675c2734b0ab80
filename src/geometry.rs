//! Derives renderable path geometry for a detour versus the original route.

use tracing::warn;

use crate::gtfs_rt::{Shape, TripModifications};
use crate::polyline::{self, LatLon};
use crate::schedule::ScheduleTables;

/// Reconstructs the original route polyline for a trip.
///
/// The trip's shape wins when it has points (ordered by point sequence);
/// otherwise the scheduled stops are connected in `stop_sequence` order. A
/// trip with neither source yields an empty path, which is a normal,
/// displayable state rather than an error.
pub fn resolve_original_path(schedule: &ScheduleTables, trip_id: &str) -> Vec<LatLon> {
    if let Some(shape_id) = schedule.shape_id_for_trip(trip_id) {
        if let Some(points) = schedule.shape_points(shape_id) {
            if !points.is_empty() {
                return points.iter().map(|p| (p.lat, p.lon)).collect();
            }
        }
    }

    let Some(stop_times) = schedule.stop_times_for_trip(trip_id) else {
        return Vec::new();
    };
    stop_times
        .iter()
        .filter_map(|st| schedule.stop(&st.stop_id))
        .map(|stop| (stop.lat, stop.lon))
        .collect()
}

/// Reconstructs the detour polyline(s).
///
/// Real-time shapes win: each non-empty encoded polyline becomes one path,
/// in entity order. A malformed polyline drops that entity's path with a
/// warning rather than aborting resolution. When no real-time shape decodes,
/// the replacement stops are connected in modification order as a single
/// path, provided at least two of them resolve to coordinates.
pub fn resolve_detour_paths(
    shapes_rt: &[&Shape],
    schedule: &ScheduleTables,
    replacement_stop_ids: &[String],
) -> Vec<Vec<LatLon>> {
    let mut paths = Vec::new();

    for shape in shapes_rt {
        let encoded = shape.encoded_polyline();
        if encoded.is_empty() {
            continue;
        }
        match polyline::decode(encoded) {
            Ok(path) => paths.push(path),
            Err(error) => {
                warn!(shape_id = shape.shape_id(), %error, "dropping real-time shape with malformed polyline");
            }
        }
    }
    if !paths.is_empty() {
        return paths;
    }

    // Unresolvable stop ids are skipped without breaking the chain order.
    let chain: Vec<LatLon> = replacement_stop_ids
        .iter()
        .filter_map(|stop_id| schedule.stop(stop_id))
        .map(|stop| (stop.lat, stop.lon))
        .collect();
    if chain.len() >= 2 {
        paths.push(chain);
    }

    paths
}

/// Resolvable replacement stops as `(stop_id, coordinates)` pairs, for
/// rendering the temporary stop markers.
pub fn replacement_stop_points(
    schedule: &ScheduleTables,
    replacement_stop_ids: &[String],
) -> Vec<(String, LatLon)> {
    replacement_stop_ids
        .iter()
        .filter_map(|stop_id| {
            schedule
                .stop(stop_id)
                .map(|stop| (stop_id.clone(), (stop.lat, stop.lon)))
        })
        .collect()
}

/// All replacement stop ids of a detour, concatenated across modifications
/// in original sequence order.
pub fn replacement_stop_ids(tm: &TripModifications) -> Vec<String> {
    tm.modifications
        .iter()
        .flat_map(|m| m.replacement_stops.iter())
        .map(|rs| rs.stop_id().to_string())
        .collect()
}

/// First selected trip that names a `trip_id`, used to anchor the original
/// route geometry.
pub fn reference_trip_id(tm: &TripModifications) -> Option<&str> {
    tm.selected_trips
        .iter()
        .map(|sel| sel.trip_id())
        .find(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{ReplacementStop, trip_modifications};
    use crate::polyline;

    fn schedule_with_stops() -> ScheduleTables {
        let mut tables = ScheduleTables::default();
        tables.insert_stop("S1", 45.1, -73.1, "");
        tables.insert_stop("S2", 45.2, -73.2, "0");
        tables.insert_stop("S3", 45.3, -73.3, "1");
        tables
    }

    #[test]
    fn test_original_path_prefers_shape() {
        let mut tables = schedule_with_stops();
        tables.insert_trip_shape("T1", "SH1");
        tables.insert_shape_point("SH1", 2, 45.02, -73.02);
        tables.insert_shape_point("SH1", 1, 45.01, -73.01);
        tables.insert_stop_time("T1", 1, "S1");
        tables.insert_stop_time("T1", 2, "S2");

        let path = resolve_original_path(&tables, "T1");
        assert_eq!(path, vec![(45.01, -73.01), (45.02, -73.02)]);
    }

    #[test]
    fn test_original_path_falls_back_to_stop_chain() {
        let mut tables = schedule_with_stops();
        tables.insert_stop_time("T1", 2, "S2");
        tables.insert_stop_time("T1", 1, "S1");
        // Unknown stop must be skipped without breaking the chain.
        tables.insert_stop_time("T1", 3, "S-unknown");

        let path = resolve_original_path(&tables, "T1");
        assert_eq!(path, vec![(45.1, -73.1), (45.2, -73.2)]);
    }

    #[test]
    fn test_original_path_empty_when_no_source() {
        let tables = schedule_with_stops();
        assert!(resolve_original_path(&tables, "T-absent").is_empty());
    }

    #[test]
    fn test_detour_prefers_rt_shapes() {
        let tables = schedule_with_stops();
        let mut shape = crate::gtfs_rt::Shape::new();
        shape.set_encoded_polyline(polyline::encode(&[(45.5, -73.5), (45.6, -73.6)]));

        let ids = vec!["S1".to_string(), "S2".to_string()];
        let paths = resolve_detour_paths(&[&shape], &tables, &ids);

        assert_eq!(paths, vec![vec![(45.5, -73.5), (45.6, -73.6)]]);
    }

    #[test]
    fn test_detour_falls_back_to_replacement_chain() {
        let tables = schedule_with_stops();
        let ids = vec![
            "S1".to_string(),
            "S-unknown".to_string(),
            "S2".to_string(),
        ];

        let paths = resolve_detour_paths(&[], &tables, &ids);
        assert_eq!(paths, vec![vec![(45.1, -73.1), (45.2, -73.2)]]);
    }

    #[test]
    fn test_detour_requires_two_resolvable_stops() {
        let tables = schedule_with_stops();
        let ids = vec!["S1".to_string(), "S-unknown".to_string()];

        assert!(resolve_detour_paths(&[], &tables, &ids).is_empty());
    }

    #[test]
    fn test_malformed_polyline_dropped_with_fallback() {
        let tables = schedule_with_stops();
        let mut shape = crate::gtfs_rt::Shape::new();
        shape.set_encoded_polyline("_p~iF".to_string()); // truncated

        let ids = vec!["S1".to_string(), "S2".to_string()];
        let paths = resolve_detour_paths(&[&shape], &tables, &ids);

        // The broken shape is dropped; the replacement chain takes over.
        assert_eq!(paths, vec![vec![(45.1, -73.1), (45.2, -73.2)]]);
    }

    #[test]
    fn test_replacement_stop_points_skips_unknown() {
        let tables = schedule_with_stops();
        let ids = vec!["S-unknown".to_string(), "S3".to_string()];

        let points = replacement_stop_points(&tables, &ids);
        assert_eq!(points, vec![("S3".to_string(), (45.3, -73.3))]);
    }

    #[test]
    fn test_replacement_stop_ids_concatenate_in_order() {
        let mut tm = crate::gtfs_rt::TripModifications::new();
        let mut m1 = trip_modifications::Modification::new();
        let mut rs = ReplacementStop::new();
        rs.set_stop_id("S1".to_string());
        m1.replacement_stops.push(rs);
        let mut m2 = trip_modifications::Modification::new();
        let mut rs = ReplacementStop::new();
        rs.set_stop_id("S2".to_string());
        m2.replacement_stops.push(rs);
        tm.modifications.push(m1);
        tm.modifications.push(m2);

        assert_eq!(replacement_stop_ids(&tm), vec!["S1", "S2"]);
    }

    #[test]
    fn test_reference_trip_id_skips_empty_selectors() {
        let mut tm = crate::gtfs_rt::TripModifications::new();
        tm.selected_trips
            .push(trip_modifications::SelectedTrips::new());
        let mut sel = trip_modifications::SelectedTrips::new();
        sel.set_trip_id("T9".to_string());
        tm.selected_trips.push(sel);

        assert_eq!(reference_trip_id(&tm), Some("T9"));
    }
}
