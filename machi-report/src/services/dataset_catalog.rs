//! Dataset catalog and indicator definitions
//!
//! Static, versioned configuration: which e-Stat tables to query, which
//! classification codes to extract, how indicators are derived from them, and
//! how presets weight categories. Validated once at construction; a failure is
//! a fatal `ConfigurationError` at process start, before any fetch.
//!
//! # e-Stat tables
//! The statistics ids below are the municipality tables of the System of
//! Social and Demographic Statistics (社会・人口統計体系 市区町村データ).

use crate::error::{ConfigurationError, FetchError};
use crate::models::{Category, Preset, PresetWeights};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// How often the upstream table changes, which drives cache lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshClass {
    /// Five-yearly census figures
    Census,
    /// Yearly administrative statistics
    Annual,
    /// Quarterly or faster series
    Frequent,
}

/// One upstream statistics table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetDefinition {
    pub id: String,
    /// e-Stat `statsDataId`, 10 digits
    pub stats_source_id: String,
    /// selector key → classification code (`cat01`)
    pub selectors: BTreeMap<String, String>,
    pub label: String,
    pub refresh: RefreshClass,
}

/// Derivation of an indicator value from a dataset's selector values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Formula {
    Direct { key: String },
    /// `numerator / denominator * scale`; absent when the denominator is 0
    Ratio {
        numerator: String,
        denominator: String,
        scale: f64,
    },
}

impl Formula {
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Formula::Direct { key } => vec![key.as_str()],
            Formula::Ratio {
                numerator,
                denominator,
                ..
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }

    pub fn evaluate(&self, values: &BTreeMap<String, Option<f64>>) -> Option<f64> {
        let get = |key: &str| values.get(key).copied().flatten();
        match self {
            Formula::Direct { key } => get(key),
            Formula::Ratio {
                numerator,
                denominator,
                scale,
            } => {
                let n = get(numerator)?;
                let d = get(denominator)?;
                if d == 0.0 {
                    None
                } else {
                    Some(n / d * scale)
                }
            }
        }
    }
}

/// Figures derived from real-estate transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceMetric {
    /// Median of trade price / floor area, yen per m²
    MedianUnitPrice,
    /// Median trade price, yen
    MedianTradePrice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSource {
    Statistics { dataset: String, formula: Formula },
    RealEstate { metric: PriceMetric },
}

/// Mapping from raw value to 0-100
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    /// Scale across the municipalities in the run
    MinMax,
    /// Fixed bounds, clamped
    Threshold { low: f64, high: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorDefinition {
    pub id: String,
    pub label: String,
    pub category: Category,
    pub higher_is_better: bool,
    pub source: IndicatorSource,
    pub normalization: Normalization,
}

impl IndicatorDefinition {
    pub fn dataset(&self) -> Option<&str> {
        match &self.source {
            IndicatorSource::Statistics { dataset, .. } => Some(dataset),
            IndicatorSource::RealEstate { .. } => None,
        }
    }
}

/// Validated catalog of datasets, indicators, and preset weights
#[derive(Debug, Clone)]
pub struct DatasetCatalog {
    datasets: BTreeMap<String, DatasetDefinition>,
    indicators: Vec<IndicatorDefinition>,
    presets: BTreeMap<Preset, PresetWeights>,
}

impl DatasetCatalog {
    /// Build and validate a catalog
    pub fn new(
        datasets: Vec<DatasetDefinition>,
        indicators: Vec<IndicatorDefinition>,
        presets: BTreeMap<Preset, PresetWeights>,
    ) -> Result<Self, ConfigurationError> {
        let mut by_id = BTreeMap::new();
        for dataset in datasets {
            validate_dataset(&dataset)?;
            let id = dataset.id.clone();
            if by_id.insert(id.clone(), dataset).is_some() {
                return Err(ConfigurationError(format!("duplicate dataset id {}", id)));
            }
        }

        let mut indicator_ids = HashSet::new();
        for indicator in &indicators {
            if !indicator_ids.insert(indicator.id.as_str()) {
                return Err(ConfigurationError(format!(
                    "duplicate indicator id {}",
                    indicator.id
                )));
            }
            validate_indicator(indicator, &by_id)?;
        }

        let covered: BTreeSet<Category> = indicators.iter().map(|i| i.category).collect();
        for preset in Preset::ALL {
            let weights = presets.get(&preset).ok_or_else(|| {
                ConfigurationError(format!("preset {} has no weights", preset))
            })?;
            validate_weights(preset, weights, &covered)?;
        }

        Ok(Self {
            datasets: by_id,
            indicators,
            presets,
        })
    }

    /// The compiled-in catalog
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::new(builtin_datasets(), builtin_indicators(), builtin_presets())
    }

    pub fn get(&self, dataset_name: &str) -> Result<&DatasetDefinition, FetchError> {
        self.datasets
            .get(dataset_name)
            .ok_or_else(|| FetchError::NotFound(format!("dataset {}", dataset_name)))
    }

    pub fn datasets(&self) -> impl Iterator<Item = &DatasetDefinition> {
        self.datasets.values()
    }

    /// All indicators in catalog order
    pub fn indicators(&self) -> &[IndicatorDefinition] {
        &self.indicators
    }

    pub fn indicators_for_categories(&self, categories: &[Category]) -> Vec<IndicatorDefinition> {
        self.indicators
            .iter()
            .filter(|i| categories.contains(&i.category))
            .cloned()
            .collect()
    }

    /// Indicators derived from one dataset
    pub fn indicators_for_dataset(&self, dataset_name: &str) -> Vec<&IndicatorDefinition> {
        self.indicators
            .iter()
            .filter(|i| i.dataset() == Some(dataset_name))
            .collect()
    }

    /// Statistics datasets needed for the given categories, sorted by id
    pub fn datasets_for_categories(&self, categories: &[Category]) -> Vec<&DatasetDefinition> {
        let names: BTreeSet<&str> = self
            .indicators
            .iter()
            .filter(|i| categories.contains(&i.category))
            .filter_map(|i| i.dataset())
            .collect();
        names
            .into_iter()
            .filter_map(|name| self.datasets.get(name))
            .collect()
    }

    pub fn needs_real_estate(&self, categories: &[Category]) -> bool {
        self.indicators.iter().any(|i| {
            categories.contains(&i.category)
                && matches!(i.source, IndicatorSource::RealEstate { .. })
        })
    }

    pub fn weights(&self, preset: Preset) -> &PresetWeights {
        // Every preset is checked in `new`
        &self.presets[&preset]
    }
}

fn validate_dataset(dataset: &DatasetDefinition) -> Result<(), ConfigurationError> {
    let id = &dataset.stats_source_id;
    if id.len() != 10 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigurationError(format!(
            "dataset {} has malformed statsSourceId {:?} (expected 10 digits)",
            dataset.id, id
        )));
    }
    if dataset.selectors.is_empty() {
        return Err(ConfigurationError(format!(
            "dataset {} declares no selectors",
            dataset.id
        )));
    }
    if let Some((key, _)) = dataset.selectors.iter().find(|(_, code)| code.trim().is_empty()) {
        return Err(ConfigurationError(format!(
            "dataset {} selector {} has an empty code",
            dataset.id, key
        )));
    }
    Ok(())
}

fn validate_indicator(
    indicator: &IndicatorDefinition,
    datasets: &BTreeMap<String, DatasetDefinition>,
) -> Result<(), ConfigurationError> {
    if let IndicatorSource::Statistics { dataset, formula } = &indicator.source {
        let definition = datasets.get(dataset).ok_or_else(|| {
            ConfigurationError(format!(
                "indicator {} references unknown dataset {}",
                indicator.id, dataset
            ))
        })?;
        for key in formula.keys() {
            if !definition.selectors.contains_key(key) {
                return Err(ConfigurationError(format!(
                    "indicator {} uses selector {} not declared by dataset {}",
                    indicator.id, key, dataset
                )));
            }
        }
    }

    if let Normalization::Threshold { low, high } = indicator.normalization {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(ConfigurationError(format!(
                "indicator {} has invalid threshold bounds {}..{}",
                indicator.id, low, high
            )));
        }
    }
    Ok(())
}

fn validate_weights(
    preset: Preset,
    weights: &PresetWeights,
    covered: &BTreeSet<Category>,
) -> Result<(), ConfigurationError> {
    if let Some((category, weight)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
        return Err(ConfigurationError(format!(
            "preset {} has invalid weight {} for {}",
            preset, weight, category
        )));
    }

    let required = weights.weighted_categories();
    if required.is_empty() {
        return Err(ConfigurationError(format!(
            "preset {} has no positive weight",
            preset
        )));
    }

    for category in required {
        if !covered.contains(&category) {
            return Err(ConfigurationError(format!(
                "preset {} requires category {} but no indicator provides it",
                preset, category
            )));
        }
    }
    Ok(())
}

fn selectors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn ratio(dataset: &str, numerator: &str, denominator: &str, scale: f64) -> IndicatorSource {
    IndicatorSource::Statistics {
        dataset: dataset.to_string(),
        formula: Formula::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            scale,
        },
    }
}

fn builtin_datasets() -> Vec<DatasetDefinition> {
    vec![
        DatasetDefinition {
            id: "population".to_string(),
            stats_source_id: "0000020201".to_string(),
            selectors: selectors(&[("total", "A1101"), ("children", "A1301")]),
            label: "人口・世帯".to_string(),
            refresh: RefreshClass::Census,
        },
        DatasetDefinition {
            id: "welfare".to_string(),
            stats_source_id: "0000020210".to_string(),
            selectors: selectors(&[("nurseries", "J2503"), ("children", "A1301")]),
            label: "福祉・社会保障".to_string(),
            refresh: RefreshClass::Annual,
        },
        DatasetDefinition {
            id: "safety".to_string(),
            stats_source_id: "0000020211".to_string(),
            selectors: selectors(&[
                ("offenses", "K4201"),
                ("traffic_accidents", "K3101"),
                ("population", "A1101"),
            ]),
            label: "安全".to_string(),
            refresh: RefreshClass::Frequent,
        },
        DatasetDefinition {
            id: "education".to_string(),
            stats_source_id: "0000020205".to_string(),
            selectors: selectors(&[
                ("elementary_schools", "E2101"),
                ("junior_high_schools", "E3101"),
                ("children", "A1301"),
            ]),
            label: "教育".to_string(),
            refresh: RefreshClass::Annual,
        },
        DatasetDefinition {
            id: "healthcare".to_string(),
            stats_source_id: "0000020209".to_string(),
            selectors: selectors(&[
                ("hospitals", "I5101"),
                ("physicians", "I6100"),
                ("population", "A1101"),
            ]),
            label: "健康・医療".to_string(),
            refresh: RefreshClass::Annual,
        },
        DatasetDefinition {
            id: "transport".to_string(),
            stats_source_id: "0000020206".to_string(),
            selectors: selectors(&[("rail_commuters", "F2801"), ("workers", "F2201")]),
            label: "労働（通勤）".to_string(),
            refresh: RefreshClass::Census,
        },
    ]
}

fn builtin_indicators() -> Vec<IndicatorDefinition> {
    vec![
        IndicatorDefinition {
            id: "child_population_share".to_string(),
            label: "年少人口割合".to_string(),
            category: Category::Childcare,
            higher_is_better: true,
            source: ratio("population", "children", "total", 100.0),
            normalization: Normalization::Threshold { low: 8.0, high: 16.0 },
        },
        IndicatorDefinition {
            id: "nurseries_per_1000_children".to_string(),
            label: "保育所等数（年少人口千人あたり）".to_string(),
            category: Category::Childcare,
            higher_is_better: true,
            source: ratio("welfare", "nurseries", "children", 1000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "median_unit_price".to_string(),
            label: "取引価格中央値（㎡単価）".to_string(),
            category: Category::Price,
            higher_is_better: false,
            source: IndicatorSource::RealEstate {
                metric: PriceMetric::MedianUnitPrice,
            },
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "median_trade_price".to_string(),
            label: "取引価格中央値".to_string(),
            category: Category::Price,
            higher_is_better: false,
            source: IndicatorSource::RealEstate {
                metric: PriceMetric::MedianTradePrice,
            },
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "offenses_per_1000".to_string(),
            label: "刑法犯認知件数（人口千人あたり）".to_string(),
            category: Category::Safety,
            higher_is_better: false,
            source: ratio("safety", "offenses", "population", 1000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "traffic_accidents_per_1000".to_string(),
            label: "交通事故発生件数（人口千人あたり）".to_string(),
            category: Category::Safety,
            higher_is_better: false,
            source: ratio("safety", "traffic_accidents", "population", 1000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "elementary_schools_per_1000_children".to_string(),
            label: "小学校数（年少人口千人あたり）".to_string(),
            category: Category::Education,
            higher_is_better: true,
            source: ratio("education", "elementary_schools", "children", 1000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "junior_high_schools_per_1000_children".to_string(),
            label: "中学校数（年少人口千人あたり）".to_string(),
            category: Category::Education,
            higher_is_better: true,
            source: ratio("education", "junior_high_schools", "children", 1000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "hospitals_per_100k".to_string(),
            label: "一般病院数（人口10万人あたり）".to_string(),
            category: Category::Healthcare,
            higher_is_better: true,
            source: ratio("healthcare", "hospitals", "population", 100_000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "physicians_per_1000".to_string(),
            label: "医師数（人口千人あたり）".to_string(),
            category: Category::Healthcare,
            higher_is_better: true,
            source: ratio("healthcare", "physicians", "population", 1000.0),
            normalization: Normalization::MinMax,
        },
        IndicatorDefinition {
            id: "rail_commuter_share".to_string(),
            label: "鉄道通勤者割合".to_string(),
            category: Category::Transport,
            higher_is_better: true,
            source: ratio("transport", "rail_commuters", "workers", 100.0),
            normalization: Normalization::Threshold { low: 0.0, high: 60.0 },
        },
    ]
}

fn builtin_presets() -> BTreeMap<Preset, PresetWeights> {
    use Category::*;
    BTreeMap::from([
        (
            Preset::Childcare,
            PresetWeights::new([
                (Childcare, 0.35),
                (Education, 0.20),
                (Safety, 0.15),
                (Healthcare, 0.15),
                (Price, 0.10),
                (Transport, 0.05),
            ]),
        ),
        (
            Preset::Price,
            PresetWeights::new([
                (Price, 0.45),
                (Transport, 0.15),
                (Safety, 0.15),
                (Childcare, 0.10),
                (Healthcare, 0.10),
                (Education, 0.05),
            ]),
        ),
        (
            Preset::Safety,
            PresetWeights::new([
                (Safety, 0.45),
                (Healthcare, 0.20),
                (Transport, 0.10),
                (Childcare, 0.10),
                (Price, 0.10),
                (Education, 0.05),
            ]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_validates() {
        let catalog = DatasetCatalog::builtin().unwrap();
        assert_eq!(catalog.get("population").unwrap().stats_source_id, "0000020201");
        for preset in Preset::ALL {
            assert!(!catalog.weights(preset).weighted_categories().is_empty());
        }
    }

    #[test]
    fn test_unknown_dataset_is_not_found() {
        let catalog = DatasetCatalog::builtin().unwrap();
        assert!(matches!(catalog.get("weather"), Err(FetchError::NotFound(_))));
    }

    #[test]
    fn test_malformed_stats_id_rejected() {
        let mut datasets = builtin_datasets();
        datasets[0].stats_source_id = "20201".to_string();
        let err = DatasetCatalog::new(datasets, builtin_indicators(), builtin_presets()).unwrap_err();
        assert!(err.0.contains("statsSourceId"));

        let mut datasets = builtin_datasets();
        datasets[0].stats_source_id = "00000202AB".to_string();
        assert!(DatasetCatalog::new(datasets, builtin_indicators(), builtin_presets()).is_err());
    }

    #[test]
    fn test_uncovered_preset_category_rejected() {
        let indicators: Vec<_> = builtin_indicators()
            .into_iter()
            .filter(|i| i.category != Category::Transport)
            .collect();
        let err = DatasetCatalog::new(builtin_datasets(), indicators, builtin_presets()).unwrap_err();
        assert!(err.0.contains("transport"));
    }

    #[test]
    fn test_undeclared_selector_rejected() {
        let mut indicators = builtin_indicators();
        indicators[0].source = ratio("population", "children", "households", 100.0);
        assert!(DatasetCatalog::new(builtin_datasets(), indicators, builtin_presets()).is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut presets = builtin_presets();
        presets.insert(
            Preset::Safety,
            PresetWeights::new([(Category::Safety, -1.0), (Category::Price, 1.0)]),
        );
        assert!(DatasetCatalog::new(builtin_datasets(), builtin_indicators(), presets).is_err());
    }

    #[test]
    fn test_datasets_for_categories() {
        let catalog = DatasetCatalog::builtin().unwrap();
        let ids: Vec<&str> = catalog
            .datasets_for_categories(&[Category::Childcare, Category::Safety])
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["population", "safety", "welfare"]);
        assert!(!catalog.needs_real_estate(&[Category::Childcare]));
        assert!(catalog.needs_real_estate(&[Category::Price]));
    }

    #[test]
    fn test_ratio_formula() {
        let formula = Formula::Ratio {
            numerator: "a".into(),
            denominator: "b".into(),
            scale: 100.0,
        };
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), Some(5.0));
        values.insert("b".to_string(), Some(20.0));
        assert_eq!(formula.evaluate(&values), Some(25.0));

        values.insert("b".to_string(), Some(0.0));
        assert_eq!(formula.evaluate(&values), None);

        values.insert("b".to_string(), None);
        assert_eq!(formula.evaluate(&values), None);
    }
}
