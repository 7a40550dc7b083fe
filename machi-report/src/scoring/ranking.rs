//! Ranking engine
//!
//! Orders scored municipalities by overall score. Cities without an overall
//! score are left out. Equal scores are ordered by code and still receive
//! distinct, sequential ranks.

use crate::models::{CityScoreResult, RankingEntry};

/// Rank results by overall score, descending
pub fn rank(results: &[CityScoreResult]) -> Vec<RankingEntry> {
    let mut scored: Vec<(&CityScoreResult, f64)> = results
        .iter()
        .filter_map(|r| r.overall.map(|overall| (r, overall)))
        .collect();

    scored.sort_by(|(a, a_score), (b, b_score)| {
        b_score
            .total_cmp(a_score)
            .then_with(|| a.municipality_code.cmp(&b.municipality_code))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(idx, (result, overall))| RankingEntry {
            rank: idx as u32 + 1,
            municipality_code: result.municipality_code.clone(),
            city_name: result.city_name.clone(),
            overall_score: overall,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataAvailability, MunicipalityCode};
    use std::collections::BTreeMap;

    fn result(code: &str, overall: Option<f64>) -> CityScoreResult {
        CityScoreResult {
            municipality_code: MunicipalityCode::parse(code).unwrap(),
            city_name: format!("city {}", code),
            choice: Vec::new(),
            category_averages: BTreeMap::new(),
            overall,
            data_availability: DataAvailability::default(),
            coverage_percent: 0.0,
        }
    }

    #[test]
    fn test_rank_orders_desc_and_skips_missing() {
        let results = vec![
            result("13104", Some(40.0)),
            result("14101", None),
            result("13101", Some(90.5)),
            result("13113", Some(61.0)),
        ];

        let ranking = rank(&results);
        let codes: Vec<&str> = ranking.iter().map(|r| r.municipality_code.as_str()).collect();
        assert_eq!(codes, vec!["13101", "13113", "13104"]);
        assert_eq!(ranking.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ties_broken_by_code_without_gaps() {
        let results = vec![
            result("13120", Some(55.0)),
            result("13102", Some(55.0)),
            result("13110", Some(55.0)),
            result("13101", Some(10.0)),
        ];

        let ranking = rank(&results);
        let codes: Vec<&str> = ranking.iter().map(|r| r.municipality_code.as_str()).collect();
        assert_eq!(codes, vec!["13102", "13110", "13120", "13101"]);
        assert_eq!(ranking.last().unwrap().rank, 4);
    }

    #[test]
    fn test_rank_is_order_independent() {
        let mut results = vec![
            result("13104", Some(70.0)),
            result("14101", Some(70.0)),
            result("27100", Some(20.0)),
        ];
        let forward = rank(&results);
        results.reverse();
        assert_eq!(forward, rank(&results));
    }

    #[test]
    fn test_empty() {
        assert!(rank(&[]).is_empty());
        assert!(rank(&[result("13104", None)]).is_empty());
    }
}
