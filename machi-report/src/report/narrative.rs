//! Short Japanese summary paragraph per municipality

use crate::models::{Category, CityScoreResult, RankingEntry};

/// Category averages at or above this are called out as strengths
pub const STRENGTH_THRESHOLD: f64 = 70.0;
/// Category averages below this are called out as weaknesses
pub const WEAKNESS_THRESHOLD: f64 = 40.0;

fn join_labels(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|c| c.label_ja())
        .collect::<Vec<_>>()
        .join("・")
}

pub fn compose_narrative(
    result: &CityScoreResult,
    ranking_entry: Option<&RankingEntry>,
    total_ranked: usize,
) -> String {
    let mut sentences = Vec::new();

    match (result.overall, ranking_entry) {
        (Some(overall), Some(entry)) => sentences.push(format!(
            "{}の総合スコアは{:.1}点で、{}市区町村中{}位です。",
            result.city_name, overall, total_ranked, entry.rank
        )),
        (Some(overall), None) => sentences.push(format!(
            "{}の総合スコアは{:.1}点です。",
            result.city_name, overall
        )),
        (None, _) => sentences.push(format!(
            "{}は十分なデータが得られず、総合スコア算出不可です。",
            result.city_name
        )),
    }

    let strengths: Vec<Category> = result
        .category_averages
        .iter()
        .filter(|(_, avg)| **avg >= STRENGTH_THRESHOLD)
        .map(|(c, _)| *c)
        .collect();
    if !strengths.is_empty() {
        sentences.push(format!("{}の評価が高い地域です。", join_labels(&strengths)));
    }

    let weaknesses: Vec<Category> = result
        .category_averages
        .iter()
        .filter(|(_, avg)| **avg < WEAKNESS_THRESHOLD)
        .map(|(c, _)| *c)
        .collect();
    if !weaknesses.is_empty() {
        sentences.push(format!("{}は相対的に低い評価です。", join_labels(&weaknesses)));
    }

    let missing = result.data_availability.missing();
    if !missing.is_empty() {
        sentences.push(format!("{}はデータを取得できませんでした。", join_labels(&missing)));
    }

    sentences.concat()
}
