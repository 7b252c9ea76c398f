//! User settings document.

use crate::document::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Measurement system used when presenting records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Kilometres, kilograms.
    #[default]
    Metric,
    /// Miles, pounds.
    Imperial,
}

/// Per-user settings. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Preferred units.
    pub units: Units,
    /// Weekly activity goal in minutes.
    pub weekly_goal_minutes: u32,
    /// IANA time zone name used by clients.
    pub timezone: String,
    /// Free-form client preferences.
    pub preferences: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            units: Units::Metric,
            weekly_goal_minutes: 150,
            timezone: "UTC".into(),
            preferences: Map::new(),
        }
    }
}

impl Document for Settings {
    const KIND: &'static str = "settings";
}
