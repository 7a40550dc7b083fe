//! Municipality name ↔ kana reading registry
//!
//! Static, bidirectional, exact-match lookup. No I/O; the built-in table is
//! initialized once and is safe for unsynchronized concurrent reads.
//!
//! Display-name variants (hiragana spellings, shortened ward names) are
//! registered as additional readings under the canonical code rather than as
//! name aliases, so reverse lookup always lands on the canonical display name.

use crate::error::ConfigurationError;
use crate::models::{MunicipalityCode, MunicipalityIdentity};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// (code, display name, readings)
const BUILTIN_MUNICIPALITIES: &[(&str, &str, &[&str])] = &[
    ("01100", "札幌市", &["さっぽろし"]),
    ("04100", "仙台市", &["せんだいし"]),
    ("11100", "さいたま市", &["さいたまし", "さいたま"]),
    ("12100", "千葉市", &["ちばし"]),
    ("13101", "千代田区", &["ちよだく"]),
    ("13102", "中央区", &["ちゅうおうく"]),
    ("13103", "港区", &["みなとく"]),
    ("13104", "新宿区", &["しんじゅくく"]),
    ("13105", "文京区", &["ぶんきょうく"]),
    ("13106", "台東区", &["たいとうく"]),
    ("13107", "墨田区", &["すみだく"]),
    ("13108", "江東区", &["こうとうく"]),
    ("13109", "品川区", &["しながわく"]),
    ("13110", "目黒区", &["めぐろく"]),
    ("13111", "大田区", &["おおたく"]),
    ("13112", "世田谷区", &["せたがやく"]),
    ("13113", "渋谷区", &["しぶやく"]),
    ("13114", "中野区", &["なかのく"]),
    ("13115", "杉並区", &["すぎなみく"]),
    ("13116", "豊島区", &["としまく"]),
    ("13117", "北区", &["きたく"]),
    ("13118", "荒川区", &["あらかわく"]),
    ("13119", "板橋区", &["いたばしく"]),
    ("13120", "練馬区", &["ねりまく"]),
    ("13121", "足立区", &["あだちく"]),
    ("13122", "葛飾区", &["かつしかく"]),
    ("13123", "江戸川区", &["えどがわく"]),
    ("13201", "八王子市", &["はちおうじし"]),
    ("14100", "横浜市", &["よこはまし"]),
    ("14101", "横浜市鶴見区", &["よこはましつるみく", "つるみく"]),
    ("14130", "川崎市", &["かわさきし"]),
    ("23100", "名古屋市", &["なごやし"]),
    ("26100", "京都市", &["きょうとし"]),
    ("27100", "大阪市", &["おおさかし"]),
    ("27123", "大阪市鶴見区", &["おおさかしつるみく", "つるみく"]),
    ("28100", "神戸市", &["こうべし"]),
    ("34100", "広島市", &["ひろしまし"]),
    ("40130", "福岡市", &["ふくおかし"]),
];

static BUILTIN: Lazy<ReadingRegistry> = Lazy::new(|| {
    let identities = BUILTIN_MUNICIPALITIES
        .iter()
        .map(|(code, name, readings)| MunicipalityIdentity {
            code: MunicipalityCode::parse(code).expect("built-in municipality codes are 5 digits"),
            display_name: (*name).to_string(),
            readings: readings.iter().map(|r| (*r).to_string()).collect(),
        })
        .collect();
    ReadingRegistry::from_identities(identities).expect("built-in registry table is consistent")
});

/// Bidirectional name/reading lookup
#[derive(Debug, Clone)]
pub struct ReadingRegistry {
    identities: Vec<MunicipalityIdentity>,
    by_code: HashMap<MunicipalityCode, usize>,
    by_name: HashMap<String, usize>,
    by_reading: HashMap<String, Vec<usize>>,
}

impl ReadingRegistry {
    /// The compiled-in registry
    pub fn builtin() -> &'static ReadingRegistry {
        &BUILTIN
    }

    /// Build a registry, rejecting duplicate codes/names and empty readings
    pub fn from_identities(
        identities: Vec<MunicipalityIdentity>,
    ) -> Result<Self, ConfigurationError> {
        let mut by_code = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_reading: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, identity) in identities.iter().enumerate() {
            if identity.readings.is_empty() || identity.readings.iter().any(|r| r.is_empty()) {
                return Err(ConfigurationError(format!(
                    "municipality {} ({}) has no usable reading",
                    identity.code, identity.display_name
                )));
            }
            if by_code.insert(identity.code.clone(), idx).is_some() {
                return Err(ConfigurationError(format!(
                    "duplicate municipality code {}",
                    identity.code
                )));
            }
            if by_name.insert(identity.display_name.clone(), idx).is_some() {
                return Err(ConfigurationError(format!(
                    "duplicate municipality name {}",
                    identity.display_name
                )));
            }
            for reading in &identity.readings {
                let entry = by_reading.entry(reading.clone()).or_default();
                if !entry.contains(&idx) {
                    entry.push(idx);
                }
            }
        }

        Ok(Self {
            identities,
            by_code,
            by_name,
            by_reading,
        })
    }

    /// Readings for a display name; empty if unregistered
    pub fn get_reading(&self, name: &str) -> &[String] {
        self.by_name
            .get(name)
            .map(|&idx| self.identities[idx].readings.as_slice())
            .unwrap_or(&[])
    }

    /// Display names registered under exactly this reading
    pub fn find_by_reading(&self, reading: &str) -> Vec<&str> {
        self.by_reading
            .get(reading)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&idx| self.identities[idx].display_name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_reading(&self, name: &str) -> bool {
        !self.get_reading(name).is_empty()
    }

    pub fn identity(&self, code: &MunicipalityCode) -> Option<&MunicipalityIdentity> {
        self.by_code.get(code).map(|&idx| &self.identities[idx])
    }

    pub fn name_of(&self, code: &MunicipalityCode) -> Option<&str> {
        self.identity(code).map(|i| i.display_name.as_str())
    }

    pub fn contains(&self, code: &MunicipalityCode) -> bool {
        self.by_code.contains_key(code)
    }

    /// All identities in registration order
    pub fn iter(&self) -> impl Iterator<Item = &MunicipalityIdentity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_name_has_reading() {
        let registry = ReadingRegistry::builtin();
        for identity in registry.iter() {
            assert!(registry.has_reading(&identity.display_name));
            assert!(!registry.get_reading(&identity.display_name).is_empty());
        }
    }

    #[test]
    fn test_unregistered_name() {
        let registry = ReadingRegistry::builtin();
        for name in ["存在しない市", "", "新宿"] {
            assert!(!registry.has_reading(name));
            assert!(registry.get_reading(name).is_empty());
        }
    }

    #[test]
    fn test_reverse_lookup_exact_only() {
        let registry = ReadingRegistry::builtin();
        assert_eq!(registry.find_by_reading("しんじゅくく"), vec!["新宿区"]);

        for fragment in ["しんじゅく", "じゅくく", "しん", "しんじゅくくく"] {
            assert!(
                registry.find_by_reading(fragment).is_empty(),
                "{fragment} must not match 新宿区"
            );
        }
    }

    #[test]
    fn test_shared_reading_returns_all_names() {
        let registry = ReadingRegistry::builtin();
        let names = registry.find_by_reading("つるみく");
        assert_eq!(names, vec!["横浜市鶴見区", "大阪市鶴見区"]);
    }

    #[test]
    fn test_variant_reading_resolves_canonical_name() {
        let registry = ReadingRegistry::builtin();
        assert_eq!(registry.find_by_reading("さいたま"), vec!["さいたま市"]);
        assert_eq!(registry.get_reading("さいたま市")[0], "さいたまし");
    }

    #[test]
    fn test_lookup_by_code() {
        let registry = ReadingRegistry::builtin();
        let code = MunicipalityCode::parse("14101").unwrap();
        assert_eq!(registry.name_of(&code), Some("横浜市鶴見区"));
        assert!(!registry.contains(&MunicipalityCode::parse("99999").unwrap()));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let identity = MunicipalityIdentity {
            code: MunicipalityCode::parse("13104").unwrap(),
            display_name: "新宿区".to_string(),
            readings: vec!["しんじゅくく".to_string()],
        };
        let mut other = identity.clone();
        other.display_name = "別名".to_string();

        assert!(ReadingRegistry::from_identities(vec![identity, other]).is_err());
    }

    #[test]
    fn test_empty_readings_rejected() {
        let identity = MunicipalityIdentity {
            code: MunicipalityCode::parse("13104").unwrap(),
            display_name: "新宿区".to_string(),
            readings: vec![],
        };
        assert!(ReadingRegistry::from_identities(vec![identity]).is_err());
    }
}
