//! Workout activity log and its derived aggregates.

use crate::document::Document;
use crate::error::MutationError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// One workout record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    /// Record id, assigned on insert when the client leaves it empty.
    #[serde(default)]
    pub id: String,
    /// Calendar day of the workout.
    pub date: NaiveDate,
    /// Free-form category ("run", "swim", ...).
    pub category: String,
    /// Duration in whole minutes.
    pub duration_minutes: u32,
    /// Distance covered, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<u64>,
    /// Energy burned, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    /// Client notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Workout {
    /// Creates a record without id, distance, calories or notes.
    pub fn new(date: NaiveDate, category: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            id: String::new(),
            date,
            category: category.into(),
            duration_minutes,
            distance_meters: None,
            calories: None,
            notes: None,
        }
    }

    /// Sets the record id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the distance.
    #[must_use]
    pub fn with_distance(mut self, meters: u64) -> Self {
        self.distance_meters = Some(meters);
        self
    }

    /// Sets the calories.
    #[must_use]
    pub fn with_calories(mut self, calories: u32) -> Self {
        self.calories = Some(calories);
        self
    }

    fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }

    fn month_key(&self) -> String {
        format!("{:04}-{:02}", self.date.year(), self.date.month())
    }

    fn week_key(&self) -> String {
        let week = self.date.iso_week();
        format!("{:04}-W{:02}", week.year(), week.week())
    }
}

/// Running totals over a set of workouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    /// Number of workouts.
    pub workouts: u64,
    /// Sum of durations.
    pub duration_minutes: u64,
    /// Sum of distances.
    pub distance_meters: u64,
    /// Sum of calories.
    pub calories: u64,
}

impl Tally {
    fn add(&mut self, workout: &Workout) {
        // Record fields are client-supplied; sums clamp at u64::MAX.
        self.workouts = self.workouts.saturating_add(1);
        self.duration_minutes = self
            .duration_minutes
            .saturating_add(u64::from(workout.duration_minutes));
        self.distance_meters = self
            .distance_meters
            .saturating_add(workout.distance_meters.unwrap_or(0));
        self.calories = self
            .calories
            .saturating_add(u64::from(workout.calories.unwrap_or(0)));
    }
}

/// The activity log document: workout records plus derived aggregates.
///
/// `totals`, `by_category`, `by_month` (keyed `YYYY-MM`) and `by_week`
/// (keyed by ISO week, `YYYY-Www`) are derived and are rebuilt from
/// `workouts` on every write. Values supplied by clients are discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityLog {
    /// Source records, in insertion order.
    pub workouts: Vec<Workout>,
    /// Totals over all records.
    pub totals: Tally,
    /// Totals per category.
    pub by_category: BTreeMap<String, Tally>,
    /// Totals per calendar month.
    pub by_month: BTreeMap<String, Tally>,
    /// Totals per ISO week.
    pub by_week: BTreeMap<String, Tally>,
}

impl ActivityLog {
    /// Builds a log from records, with aggregates computed.
    pub fn from_workouts(workouts: Vec<Workout>) -> Self {
        let mut log = Self {
            workouts,
            ..Self::default()
        };
        log.recompute_aggregates();
        log
    }

    /// Finds a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Workout> {
        self.workouts.iter().find(|w| w.id == id)
    }

    fn position(&self, id: &str) -> Result<usize, MutationError> {
        self.workouts
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| MutationError::RecordNotFound(id.to_string()))
    }
}

impl Document for ActivityLog {
    const KIND: &'static str = "workouts";

    fn recompute_aggregates(&mut self) {
        let mut totals = Tally::default();
        let mut by_category = BTreeMap::<String, Tally>::new();
        let mut by_month = BTreeMap::<String, Tally>::new();
        let mut by_week = BTreeMap::<String, Tally>::new();

        for workout in &self.workouts {
            totals.add(workout);
            by_category
                .entry(workout.category.clone())
                .or_default()
                .add(workout);
            by_month.entry(workout.month_key()).or_default().add(workout);
            by_week.entry(workout.week_key()).or_default().add(workout);
        }

        self.totals = totals;
        self.by_category = by_category;
        self.by_month = by_month;
        self.by_week = by_week;
    }
}

/// A record-level change to an [`ActivityLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityMutation {
    /// Append one record.
    Append(Workout),
    /// Replace the record with this id.
    Replace {
        /// Id of the record to replace.
        id: String,
        /// New contents; its id is forced to `id`.
        workout: Workout,
    },
    /// Delete the record with this id.
    Delete {
        /// Id of the record to delete.
        id: String,
    },
    /// Replace every record (bulk import).
    ReplaceAll(Vec<Workout>),
}

impl ActivityMutation {
    /// Applies the change to `log`.
    ///
    /// Aggregates are left stale; the store recomputes them before committing.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::RecordNotFound`] if `Replace` or `Delete`
    /// address an id that is not in the log, and
    /// [`MutationError::DuplicateRecord`] if `Append` carries an id already in
    /// the log or `ReplaceAll` carries the same id twice. The log is
    /// unchanged then.
    pub fn apply(self, log: &mut ActivityLog) -> Result<(), MutationError> {
        match self {
            Self::Append(mut workout) => {
                workout.ensure_id();
                if log.get(&workout.id).is_some() {
                    return Err(MutationError::DuplicateRecord(workout.id));
                }
                log.workouts.push(workout);
            }
            Self::Replace { id, mut workout } => {
                let idx = log.position(&id)?;
                workout.id = id;
                log.workouts[idx] = workout;
            }
            Self::Delete { id } => {
                let idx = log.position(&id)?;
                log.workouts.remove(idx);
            }
            Self::ReplaceAll(mut workouts) => {
                workouts.iter_mut().for_each(Workout::ensure_id);
                let mut seen = HashSet::with_capacity(workouts.len());
                if let Some(dup) = workouts.iter().find(|w| !seen.insert(w.id.as_str())) {
                    return Err(MutationError::DuplicateRecord(dup.id.clone()));
                }
                log.workouts = workouts;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample() -> ActivityLog {
        ActivityLog::from_workouts(vec![
            Workout::new(day("2024-01-29"), "run", 30)
                .with_id("a")
                .with_distance(5_000),
            Workout::new(day("2024-02-01"), "swim", 45)
                .with_id("b")
                .with_calories(400),
            Workout::new(day("2024-02-03"), "run", 20)
                .with_id("c")
                .with_distance(3_000)
                .with_calories(200),
        ])
    }

    #[test]
    fn aggregates_from_records() {
        let log = sample();

        assert_eq!(
            log.totals,
            Tally {
                workouts: 3,
                duration_minutes: 95,
                distance_meters: 8_000,
                calories: 600,
            }
        );
        assert_eq!(log.by_category["run"].workouts, 2);
        assert_eq!(log.by_category["swim"].duration_minutes, 45);
        assert_eq!(log.by_month["2024-01"].workouts, 1);
        assert_eq!(log.by_month["2024-02"].workouts, 2);
        // 2024-01-29 through 2024-02-03 is a single ISO week.
        assert_eq!(log.by_week.len(), 1);
        assert_eq!(log.by_week["2024-W05"].workouts, 3);
    }

    #[test]
    fn append_recomputes_from_scratch() {
        let mut log = sample();
        // Tamper with aggregates; recomputation must not build on them.
        log.totals.workouts = 999;
        log.by_category.insert("ghost".into(), Tally::default());

        let extra = Workout::new(day("2024-02-10"), "bike", 60).with_distance(20_000);
        ActivityMutation::Append(extra.clone()).apply(&mut log).unwrap();
        log.recompute_aggregates();

        let mut expected_records = sample().workouts;
        expected_records.push(log.workouts[3].clone());
        assert_eq!(log, ActivityLog::from_workouts(expected_records));
        assert_eq!(log.totals.workouts, 4);
        assert!(!log.by_category.contains_key("ghost"));
    }

    #[test]
    fn append_assigns_id() {
        let mut log = ActivityLog::default();
        ActivityMutation::Append(Workout::new(day("2024-05-01"), "yoga", 15))
            .apply(&mut log)
            .unwrap();
        assert!(!log.workouts[0].id.is_empty());

        ActivityMutation::Append(Workout::new(day("2024-05-01"), "yoga", 15).with_id("mine"))
            .apply(&mut log)
            .unwrap();
        assert_eq!(log.workouts[1].id, "mine");
    }

    #[test]
    fn replace_by_id() {
        let mut log = sample();
        ActivityMutation::Replace {
            id: "b".into(),
            workout: Workout::new(day("2024-02-01"), "swim", 60).with_id("ignored"),
        }
        .apply(&mut log)
        .unwrap();

        let replaced = log.get("b").unwrap();
        assert_eq!(replaced.duration_minutes, 60);
        assert!(log.get("ignored").is_none());
    }

    #[test]
    fn delete_by_id() {
        let mut log = sample();
        ActivityMutation::Delete { id: "a".into() }
            .apply(&mut log)
            .unwrap();
        assert_eq!(log.workouts.len(), 2);
        assert!(log.get("a").is_none());
    }

    #[test]
    fn missing_record_is_reported() {
        let mut log = sample();
        let before = log.clone();

        let err = ActivityMutation::Delete { id: "nope".into() }
            .apply(&mut log)
            .unwrap_err();
        assert_eq!(err, MutationError::RecordNotFound("nope".into()));

        let err = ActivityMutation::Replace {
            id: "nope".into(),
            workout: Workout::new(day("2024-01-01"), "run", 1),
        }
        .apply(&mut log)
        .unwrap_err();
        assert_eq!(err, MutationError::RecordNotFound("nope".into()));
        assert_eq!(log, before);
    }

    #[test]
    fn replace_all_assigns_missing_ids() {
        let mut log = sample();
        ActivityMutation::ReplaceAll(vec![
            Workout::new(day("2023-12-31"), "walk", 10),
            Workout::new(day("2024-01-01"), "walk", 10).with_id("keep"),
        ])
        .apply(&mut log)
        .unwrap();

        assert_eq!(log.workouts.len(), 2);
        assert!(!log.workouts[0].id.is_empty());
        assert_eq!(log.workouts[1].id, "keep");
    }

    #[test]
    fn append_rejects_taken_id() {
        let mut log = sample();
        let before = log.clone();

        let err = ActivityMutation::Append(Workout::new(day("2024-03-01"), "run", 5).with_id("b"))
            .apply(&mut log)
            .unwrap_err();
        assert_eq!(err, MutationError::DuplicateRecord("b".into()));
        assert_eq!(log, before);
    }

    #[test]
    fn replace_all_rejects_repeated_ids() {
        let mut log = sample();
        let before = log.clone();

        let err = ActivityMutation::ReplaceAll(vec![
            Workout::new(day("2024-01-01"), "walk", 10).with_id("x"),
            Workout::new(day("2024-01-02"), "walk", 10),
            Workout::new(day("2024-01-03"), "walk", 10).with_id("x"),
        ])
        .apply(&mut log)
        .unwrap_err();
        assert_eq!(err, MutationError::DuplicateRecord("x".into()));
        assert_eq!(log, before);
    }

    #[test]
    fn huge_values_saturate() {
        let log = ActivityLog::from_workouts(vec![
            Workout::new(day("2024-04-01"), "ultra", u32::MAX)
                .with_id("a")
                .with_distance(u64::MAX),
            Workout::new(day("2024-04-02"), "ultra", 10)
                .with_id("b")
                .with_distance(u64::MAX),
        ]);
        assert_eq!(log.totals.distance_meters, u64::MAX);
        assert_eq!(log.by_category["ultra"].distance_meters, u64::MAX);
        assert_eq!(log.by_month["2024-04"].duration_minutes, u64::from(u32::MAX) + 10);
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["workouts"][0]["durationMinutes"], 30);
        assert_eq!(json["workouts"][0]["date"], "2024-01-29");
        assert_eq!(json["byCategory"]["run"]["distanceMeters"], 8_000);
        assert!(json["workouts"][0].get("notes").is_none());
    }

    fn workout_strategy() -> impl Strategy<Value = Workout> {
        (
            0i64..730,
            prop::sample::select(vec!["run", "swim", "bike", "yoga"]),
            0u32..300,
            prop::option::of(0u64..50_000),
            prop::option::of(0u32..2_000),
        )
            .prop_map(|(offset, category, minutes, distance, calories)| {
                let date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
                    + chrono::Duration::days(offset);
                Workout {
                    id: String::new(),
                    date,
                    category: category.to_string(),
                    duration_minutes: minutes,
                    distance_meters: distance,
                    calories,
                    notes: None,
                }
            })
    }

    proptest! {
        #[test]
        fn appending_matches_full_recompute(
            existing in prop::collection::vec(workout_strategy(), 0..20),
            extra in workout_strategy(),
        ) {
            let mut log = ActivityLog::from_workouts(existing);
            ActivityMutation::Append(extra).apply(&mut log).unwrap();
            log.recompute_aggregates();

            let rebuilt = ActivityLog::from_workouts(log.workouts.clone());
            prop_assert_eq!(&log, &rebuilt);
            prop_assert_eq!(log.totals.workouts as usize, log.workouts.len());
            let per_category: u64 = log.by_category.values().map(|t| t.workouts).sum();
            prop_assert_eq!(per_category, log.totals.workouts);
        }
    }
}
