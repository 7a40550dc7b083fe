//! Observation, score, and ranking value types
//!
//! Absence is modelled with `Option`, never with zero: a municipality whose
//! data could not be obtained keeps `None` all the way to the report.

use super::{Category, MunicipalityCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw measurement for one municipality and indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub municipality_code: MunicipalityCode,
    pub indicator_id: String,
    pub value: Option<f64>,
}

impl RawObservation {
    pub fn present(code: MunicipalityCode, indicator_id: impl Into<String>, value: f64) -> Self {
        Self {
            municipality_code: code,
            indicator_id: indicator_id.into(),
            value: Some(value),
        }
    }

    pub fn absent(code: MunicipalityCode, indicator_id: impl Into<String>) -> Self {
        Self {
            municipality_code: code,
            indicator_id: indicator_id.into(),
            value: None,
        }
    }
}

/// Normalized 0-100 score for one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceScore {
    pub indicator_id: String,
    pub category: Category,
    pub score: Option<f64>,
}

/// Per-category data availability flags for one municipality
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataAvailability(BTreeMap<Category, bool>);

impl DataAvailability {
    pub fn set(&mut self, category: Category, available: bool) {
        self.0.insert(category, available);
    }

    /// `None` when the category was not part of the run
    pub fn get(&self, category: Category) -> Option<bool> {
        self.0.get(&category).copied()
    }

    pub fn is_available(&self, category: Category) -> bool {
        self.get(category).unwrap_or(false)
    }

    /// Scored categories whose data could not be obtained
    pub fn missing(&self) -> Vec<Category> {
        self.0
            .iter()
            .filter(|(_, available)| !**available)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, bool)> + '_ {
        self.0.iter().map(|(c, a)| (*c, *a))
    }
}

/// Scoring outcome for one municipality in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityScoreResult {
    pub municipality_code: MunicipalityCode,
    pub city_name: String,
    /// One entry per scored indicator, in catalog order
    pub choice: Vec<ChoiceScore>,
    /// Only categories with at least one present score
    pub category_averages: BTreeMap<Category, f64>,
    /// `None` when no indicator resolved; such cities are not ranked
    pub overall: Option<f64>,
    pub data_availability: DataAvailability,
    /// Share of scored indicators with data, 0-100
    pub coverage_percent: f64,
}

impl CityScoreResult {
    pub fn category_average(&self, category: Category) -> Option<f64> {
        self.category_averages.get(&category).copied()
    }
}

/// Position of one municipality in a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub municipality_code: MunicipalityCode,
    pub city_name: String,
    pub overall_score: f64,
}
