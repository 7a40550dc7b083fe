//! Scoring engine
//!
//! Turns raw observations into 0-100 indicator scores, per-category averages
//! and a weighted overall score. Pure and deterministic: identical inputs
//! always give identical results.
//!
//! # Normalization
//! - `MinMax`: `(v - min) / (max - min) * 100` over the present values in the
//!   run; a degenerate distribution (`max == min`) scores 50.
//! - `Threshold`: `(v - low) / (high - low) * 100`, clamped to [0, 100].
//!
//! Indicators where lower is better are inverted (`100 - score`) after
//! normalization. Absent values stay absent and never count as zero.

pub mod ranking;

pub use ranking::rank;

use crate::models::{
    Category, ChoiceScore, CityScoreResult, DataAvailability, MunicipalityCode,
    MunicipalityIdentity, PresetWeights, RawObservation,
};
use crate::services::dataset_catalog::{IndicatorDefinition, Normalization};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Score given to every city when an indicator does not discriminate
pub const DEGENERATE_SCORE: f64 = 50.0;

/// Range of present values for one indicator in a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distribution {
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl Distribution {
    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }
}

/// Per-indicator distributions keyed by indicator id
pub type Distributions = BTreeMap<String, Distribution>;

/// `numerator / denominator * 100`, clamped to [0, 100]
///
/// An absent or non-positive denominator gives 0; `numerator >= denominator`
/// gives exactly 100.
pub fn percentage(numerator: f64, denominator: Option<f64>) -> f64 {
    match denominator {
        Some(d) if d > 0.0 => {
            if numerator >= d {
                100.0
            } else if numerator <= 0.0 || numerator.is_nan() {
                0.0
            } else {
                numerator / d * 100.0
            }
        }
        _ => 0.0,
    }
}

type ObservationIndex<'a> = HashMap<(&'a str, &'a str), Option<f64>>;

fn index_observations(observations: &[RawObservation]) -> ObservationIndex<'_> {
    observations
        .iter()
        .map(|o| ((o.municipality_code.as_str(), o.indicator_id.as_str()), o.value))
        .collect()
}

/// Scores municipalities against one preset's weights
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    indicators: Vec<IndicatorDefinition>,
    weights: PresetWeights,
}

impl ScoringEngine {
    pub fn new(indicators: Vec<IndicatorDefinition>, weights: PresetWeights) -> Self {
        Self { indicators, weights }
    }

    pub fn indicators(&self) -> &[IndicatorDefinition] {
        &self.indicators
    }

    /// Categories covered by the engine's indicators
    pub fn categories(&self) -> Vec<Category> {
        self.indicators
            .iter()
            .map(|i| i.category)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Min/max over present values for each indicator
    pub fn distributions(&self, observations: &[RawObservation]) -> Distributions {
        let mut distributions = Distributions::new();
        for observation in observations {
            let Some(value) = observation.value.filter(|v| v.is_finite()) else {
                continue;
            };
            if !self.indicators.iter().any(|i| i.id == observation.indicator_id) {
                continue;
            }
            distributions
                .entry(observation.indicator_id.clone())
                .and_modify(|d| d.include(value))
                .or_insert(Distribution {
                    min: value,
                    max: value,
                    count: 1,
                });
        }
        distributions
    }

    /// Score every city, in the given order
    pub fn score_all(
        &self,
        cities: &[MunicipalityIdentity],
        observations: &[RawObservation],
    ) -> Vec<CityScoreResult> {
        let codes: BTreeSet<&str> = cities.iter().map(|c| c.code.as_str()).collect();
        let in_run: Vec<RawObservation> = observations
            .iter()
            .filter(|o| codes.contains(o.municipality_code.as_str()))
            .cloned()
            .collect();
        let distributions = self.distributions(&in_run);

        cities
            .iter()
            .map(|city| self.score(&city.code, &city.display_name, &in_run, &distributions))
            .collect()
    }

    /// Score one city against precomputed distributions
    pub fn score(
        &self,
        code: &MunicipalityCode,
        city_name: &str,
        observations: &[RawObservation],
        distributions: &Distributions,
    ) -> CityScoreResult {
        let index = index_observations(observations);

        let choice: Vec<ChoiceScore> = self
            .indicators
            .iter()
            .map(|indicator| {
                let value = index
                    .get(&(code.as_str(), indicator.id.as_str()))
                    .copied()
                    .flatten();
                let score = value.and_then(|v| {
                    normalize(indicator, v, distributions.get(&indicator.id))
                });
                ChoiceScore {
                    indicator_id: indicator.id.clone(),
                    category: indicator.category,
                    score,
                }
            })
            .collect();

        let mut sums: BTreeMap<Category, (f64, usize)> = BTreeMap::new();
        for item in &choice {
            if let Some(score) = item.score {
                let entry = sums.entry(item.category).or_insert((0.0, 0));
                entry.0 += score;
                entry.1 += 1;
            }
        }
        let category_averages: BTreeMap<Category, f64> = sums
            .into_iter()
            .map(|(category, (sum, count))| (category, sum / count as f64))
            .collect();

        let mut data_availability = DataAvailability::default();
        for category in self.categories() {
            data_availability.set(category, category_averages.contains_key(&category));
        }

        let present = choice.iter().filter(|c| c.score.is_some()).count();
        let coverage_percent = percentage(present as f64, Some(choice.len() as f64));

        CityScoreResult {
            municipality_code: code.clone(),
            city_name: city_name.to_string(),
            overall: self.overall(&category_averages),
            choice,
            category_averages,
            data_availability,
            coverage_percent,
        }
    }

    /// Weighted mean over categories with an average and positive weight
    pub fn overall(&self, category_averages: &BTreeMap<Category, f64>) -> Option<f64> {
        let (weighted, total_weight) = category_averages
            .iter()
            .map(|(category, avg)| (self.weights.weight(*category), *avg))
            .filter(|(weight, _)| *weight > 0.0)
            .fold((0.0, 0.0), |(sum, total), (weight, avg)| {
                (sum + weight * avg, total + weight)
            });

        if total_weight > 0.0 {
            Some(weighted / total_weight)
        } else {
            None
        }
    }
}

/// Normalize one value to 0-100, inverted when lower is better
pub fn normalize(
    indicator: &IndicatorDefinition,
    value: f64,
    distribution: Option<&Distribution>,
) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }

    let scaled = match indicator.normalization {
        Normalization::MinMax => {
            let d = distribution?;
            if d.max == d.min {
                return Some(DEGENERATE_SCORE);
            }
            ((value - d.min) / (d.max - d.min) * 100.0).clamp(0.0, 100.0)
        }
        Normalization::Threshold { low, high } => {
            ((value - low) / (high - low) * 100.0).clamp(0.0, 100.0)
        }
    };

    Some(if indicator.higher_is_better {
        scaled
    } else {
        100.0 - scaled
    })
}
