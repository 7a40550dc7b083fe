//! Indicator categories and weighting presets

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Indicator grouping
///
/// Declaration order is the display order used in reports and charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Childcare,
    Price,
    Safety,
    Education,
    Healthcare,
    Transport,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Childcare,
        Category::Price,
        Category::Safety,
        Category::Education,
        Category::Healthcare,
        Category::Transport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Childcare => "childcare",
            Category::Price => "price",
            Category::Safety => "safety",
            Category::Education => "education",
            Category::Healthcare => "healthcare",
            Category::Transport => "transport",
        }
    }

    /// Label used in rendered reports
    pub fn label_ja(self) -> &'static str {
        match self {
            Category::Childcare => "子育て",
            Category::Price => "住宅価格",
            Category::Safety => "治安",
            Category::Education => "教育",
            Category::Healthcare => "医療",
            Category::Transport => "交通",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

/// Named weighting scheme over categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Childcare,
    Price,
    Safety,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Childcare, Preset::Price, Preset::Safety];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Childcare => "childcare",
            Preset::Price => "price",
            Preset::Safety => "safety",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownPreset(s.to_string()))
    }
}

/// Category weights for one preset
///
/// Categories absent from the map have weight zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresetWeights(BTreeMap<Category, f64>);

impl PresetWeights {
    pub fn new(weights: impl IntoIterator<Item = (Category, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    pub fn weight(&self, category: Category) -> f64 {
        self.0.get(&category).copied().unwrap_or(0.0)
    }

    /// Categories with positive weight, in display order
    pub fn weighted_categories(&self) -> Vec<Category> {
        self.0
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        self.0.iter().map(|(c, w)| (*c, *w))
    }

    /// Copy keeping only the categories accepted by `include`
    pub fn restricted_to(&self, include: impl Fn(Category) -> bool) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(c, _)| include(**c))
                .map(|(c, w)| (*c, *w))
                .collect(),
        )
    }
}
