//! Consistency rules for TripModifications entities.
//!
//! Validation never fails the request: it walks the decoded feed in document
//! order and returns an ordered, possibly empty, issue list. Identifiers
//! that do not resolve in the schedule are skipped, since feeds legitimately
//! reference data that is stale relative to the schedule snapshot.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::decoder::field_present;
use crate::gtfs_rt::{FeedMessage, TripModifications};
use crate::schedule::ScheduleTables;

pub mod codes {
    pub const REPLACEMENT_STOP_NOT_ROUTABLE: &str = "REPLACEMENT_STOP_NOT_ROUTABLE";
    pub const TRAVEL_TIME_NOT_MONOTONIC: &str = "TRAVEL_TIME_NOT_MONOTONIC";
    pub const TM_DUPLICATE_ASSIGNMENT: &str = "TM_DUPLICATE_ASSIGNMENT";
    pub const TM_SELECTOR_WITHOUT_TRIP_ID: &str = "TM_SELECTOR_WITHOUT_TRIP_ID";
}

/// Placeholder service date for entities that select trips without naming
/// any date.
pub const WILDCARD_SERVICE_DATE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warn,
    Info,
}

/// Closed value type for issue context entries, so report fixtures stay
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Str(v) => f.write_str(v),
            ContextValue::Int(v) => write!(f, "{v}"),
            ContextValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::Str(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::Str(v)
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        ContextValue::Int(v)
    }
}

impl From<usize> for ContextValue {
    fn from(v: usize) -> Self {
        ContextValue::Int(v as i64)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub level: Level,
    pub code: &'static str,
    pub message: String,
    /// Id of the originating feed entity, empty when absent.
    pub entity_id: String,
    /// Ordered by key, so serialized output is stable for identical input.
    pub context: BTreeMap<String, ContextValue>,
}

impl ValidationIssue {
    fn new(level: Level, code: &'static str, entity_id: &str, message: String) -> Self {
        ValidationIssue {
            level,
            code,
            message,
            entity_id: entity_id.to_string(),
            context: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Validates every TripModifications entity in the feed.
///
/// Issues come out in discovery order: entities, then modifications, then
/// replacement stops, in document order. The ordering is stable for
/// identical input.
pub fn validate(feed: &FeedMessage, schedule: &ScheduleTables) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut assignments: HashSet<(String, String)> = HashSet::new();

    for entity in &feed.entity {
        if !field_present(entity, "trip_modifications") {
            continue;
        }
        let Some(tm) = entity.trip_modifications.as_ref() else {
            continue;
        };
        let entity_id = entity.id();

        check_modifications(tm, schedule, entity_id, &mut issues);
        check_duplicate_assignments(tm, entity_id, &mut assignments, &mut issues);
    }

    issues
}

/// Routability and travel-time monotonicity, walked per modification.
fn check_modifications(
    tm: &TripModifications,
    schedule: &ScheduleTables,
    entity_id: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    for (modification_index, modification) in tm.modifications.iter().enumerate() {
        let mut previous: Option<i32> = None;

        for (position, replacement) in modification.replacement_stops.iter().enumerate() {
            let stop_id = replacement.stop_id();

            // Unknown stops are skipped; a resolvable stop must be routable.
            if let Some(stop) = schedule.stop(stop_id) {
                if !stop.is_routable() {
                    issues.push(
                        ValidationIssue::new(
                            Level::Error,
                            codes::REPLACEMENT_STOP_NOT_ROUTABLE,
                            entity_id,
                            format!(
                                "replacement stop '{stop_id}' is not routable (location_type={})",
                                stop.location_type
                            ),
                        )
                        .with("replacement_stop_id", stop_id)
                        .with("location_type", stop.location_type.as_str()),
                    );
                }
            }

            let travel_time = replacement.travel_time_to_stop();
            if let Some(previous) = previous {
                if travel_time < previous {
                    issues.push(
                        ValidationIssue::new(
                            Level::Error,
                            codes::TRAVEL_TIME_NOT_MONOTONIC,
                            entity_id,
                            format!(
                                "travel_time_to_stop decreases from {previous} to {travel_time} \
                                 at position {position} of modification {modification_index}"
                            ),
                        )
                        .with("modification_index", modification_index)
                        .with("position", position)
                        .with("previous_travel_time", i64::from(previous))
                        .with("travel_time", i64::from(travel_time)),
                    );
                }
            }
            previous = Some(travel_time);
        }
    }
}

/// Cross-entity duplicate detection on the `(trip_id, service_date)` key.
///
/// Selectors lacking a `trip_id` cannot participate in deduplication and
/// get a WARN instead. Entities with no service dates claim the wildcard
/// date, so two date-less detours for the same trip still collide.
fn check_duplicate_assignments(
    tm: &TripModifications,
    entity_id: &str,
    assignments: &mut HashSet<(String, String)>,
    issues: &mut Vec<ValidationIssue>,
) {
    let wildcard = [WILDCARD_SERVICE_DATE.to_string()];
    let dates: &[String] = if tm.service_dates.is_empty() {
        &wildcard
    } else {
        &tm.service_dates
    };

    for (selector_index, selector) in tm.selected_trips.iter().enumerate() {
        let trip_id = selector.trip_id();
        if trip_id.is_empty() {
            issues.push(
                ValidationIssue::new(
                    Level::Warn,
                    codes::TM_SELECTOR_WITHOUT_TRIP_ID,
                    entity_id,
                    format!("selected trip {selector_index} names no trip_id, cannot check for duplicate assignment"),
                )
                .with("selector_index", selector_index),
            );
            continue;
        }

        for date in dates {
            if !assignments.insert((trip_id.to_string(), date.clone())) {
                issues.push(
                    ValidationIssue::new(
                        Level::Error,
                        codes::TM_DUPLICATE_ASSIGNMENT,
                        entity_id,
                        format!("trip '{trip_id}' is already modified on service date '{date}'"),
                    )
                    .with("trip_id", trip_id)
                    .with("service_date", date.as_str()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{
        FeedEntity, FeedHeader, FeedMessage, ReplacementStop, trip_modifications,
    };
    use protobuf::MessageField;

    fn feed_with(entities: Vec<FeedEntity>) -> FeedMessage {
        let mut header = FeedHeader::new();
        header.set_gtfs_realtime_version("2.0".to_string());
        let mut feed = FeedMessage::new();
        feed.header = MessageField::some(header);
        feed.entity = entities;
        feed
    }

    fn tm_entity(id: &str, tm: TripModifications) -> FeedEntity {
        let mut entity = FeedEntity::new();
        entity.set_id(id.to_string());
        entity.trip_modifications = MessageField::some(tm);
        entity
    }

    fn replacement(stop_id: &str, travel_time: i32) -> ReplacementStop {
        let mut rs = ReplacementStop::new();
        rs.set_stop_id(stop_id.to_string());
        rs.set_travel_time_to_stop(travel_time);
        rs
    }

    fn modification(stops: Vec<ReplacementStop>) -> trip_modifications::Modification {
        let mut m = trip_modifications::Modification::new();
        m.replacement_stops = stops;
        m
    }

    fn selector(trip_id: &str) -> trip_modifications::SelectedTrips {
        let mut sel = trip_modifications::SelectedTrips::new();
        if !trip_id.is_empty() {
            sel.set_trip_id(trip_id.to_string());
        }
        sel
    }

    fn schedule() -> ScheduleTables {
        let mut tables = ScheduleTables::default();
        tables.insert_stop("S-ok", 45.1, -73.1, "0");
        tables.insert_stop("S-blank", 45.2, -73.2, "");
        tables.insert_stop("S-station", 45.3, -73.3, "1");
        tables
    }

    #[test]
    fn test_empty_feed_yields_no_issues() {
        let issues = validate(&feed_with(vec![]), &schedule());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_routability() {
        let mut tm = TripModifications::new();
        tm.modifications.push(modification(vec![
            replacement("S-ok", 0),
            replacement("S-blank", 10),
            replacement("S-station", 20),
            replacement("S-unknown", 30),
        ]));
        let issues = validate(&feed_with(vec![tm_entity("e1", tm)]), &schedule());

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.level, Level::Error);
        assert_eq!(issue.code, codes::REPLACEMENT_STOP_NOT_ROUTABLE);
        assert_eq!(issue.entity_id, "e1");
        assert_eq!(
            issue.context.get("replacement_stop_id"),
            Some(&ContextValue::Str("S-station".to_string()))
        );
        assert_eq!(
            issue.context.get("location_type"),
            Some(&ContextValue::Str("1".to_string()))
        );
    }

    #[test]
    fn test_monotonicity_single_dip() {
        let mut tm = TripModifications::new();
        tm.modifications.push(modification(vec![
            replacement("S-ok", 10),
            replacement("S-ok", 20),
            replacement("S-ok", 15),
            replacement("S-ok", 30),
        ]));
        let issues = validate(&feed_with(vec![tm_entity("e1", tm)]), &schedule());

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.code, codes::TRAVEL_TIME_NOT_MONOTONIC);
        assert_eq!(issue.context.get("position"), Some(&ContextValue::Int(2)));
        assert_eq!(
            issue.context.get("modification_index"),
            Some(&ContextValue::Int(0))
        );
    }

    #[test]
    fn test_monotonicity_resets_across_modifications() {
        // 30 then 5 in a fresh modification is fine; no cross-boundary rule.
        let mut tm = TripModifications::new();
        tm.modifications
            .push(modification(vec![replacement("S-ok", 10), replacement("S-ok", 30)]));
        tm.modifications
            .push(modification(vec![replacement("S-ok", 5), replacement("S-ok", 8)]));
        let issues = validate(&feed_with(vec![tm_entity("e1", tm)]), &schedule());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_equal_travel_times_are_monotonic() {
        let mut tm = TripModifications::new();
        tm.modifications
            .push(modification(vec![replacement("S-ok", 10), replacement("S-ok", 10)]));
        let issues = validate(&feed_with(vec![tm_entity("e1", tm)]), &schedule());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_duplicate_assignment_flags_second_entity() {
        let mut tm1 = TripModifications::new();
        tm1.selected_trips.push(selector("T1"));
        tm1.service_dates.push("20250101".to_string());

        let mut tm2 = TripModifications::new();
        tm2.selected_trips.push(selector("T1"));
        tm2.service_dates.push("20250101".to_string());
        tm2.service_dates.push("20250102".to_string());

        let issues = validate(
            &feed_with(vec![tm_entity("e1", tm1), tm_entity("e2", tm2)]),
            &schedule(),
        );

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.code, codes::TM_DUPLICATE_ASSIGNMENT);
        assert_eq!(issue.entity_id, "e2");
        assert_eq!(
            issue.context.get("service_date"),
            Some(&ContextValue::Str("20250101".to_string()))
        );
    }

    #[test]
    fn test_dateless_entities_collide_on_wildcard() {
        let mut tm1 = TripModifications::new();
        tm1.selected_trips.push(selector("T1"));
        let mut tm2 = TripModifications::new();
        tm2.selected_trips.push(selector("T1"));

        let issues = validate(
            &feed_with(vec![tm_entity("e1", tm1), tm_entity("e2", tm2)]),
            &schedule(),
        );

        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].context.get("service_date"),
            Some(&ContextValue::Str(WILDCARD_SERVICE_DATE.to_string()))
        );
    }

    #[test]
    fn test_selector_without_trip_id_warns() {
        let mut tm = TripModifications::new();
        tm.selected_trips.push(selector(""));
        tm.service_dates.push("20250101".to_string());

        let issues = validate(&feed_with(vec![tm_entity("e1", tm)]), &schedule());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, Level::Warn);
        assert_eq!(issues[0].code, codes::TM_SELECTOR_WITHOUT_TRIP_ID);
    }

    #[test]
    fn test_issue_order_is_document_order() {
        let mut tm1 = TripModifications::new();
        tm1.selected_trips.push(selector("T1"));
        tm1.modifications
            .push(modification(vec![replacement("S-station", 0)]));

        let mut tm2 = TripModifications::new();
        tm2.selected_trips.push(selector("T1"));
        tm2.modifications.push(modification(vec![
            replacement("S-ok", 20),
            replacement("S-ok", 10),
        ]));

        let issues = validate(
            &feed_with(vec![tm_entity("e1", tm1), tm_entity("e2", tm2)]),
            &schedule(),
        );

        let codes_seen: Vec<&str> = issues.iter().map(|i| i.code).collect();
        assert_eq!(
            codes_seen,
            vec![
                codes::REPLACEMENT_STOP_NOT_ROUTABLE,
                codes::TRAVEL_TIME_NOT_MONOTONIC,
                codes::TM_DUPLICATE_ASSIGNMENT,
            ]
        );
        assert_eq!(issues[2].entity_id, "e2");
    }
}
