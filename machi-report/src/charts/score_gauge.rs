//! Semicircular score gauge
//!
//! The arc is a half circle of radius 80 drawn with a dash pattern: the dash
//! covers the score's share of the half circumference and the offset hides
//! the rest.

use super::escape_xml;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const GAUGE_RADIUS: f64 = 80.0;
const CENTER_X: f64 = 100.0;
const CENTER_Y: f64 = 100.0;
const STROKE_WIDTH: f64 = 16.0;
const TRACK_COLOR: &str = "#e5e7eb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeOptions {
    pub score: f64,
    pub label: String,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub total_cities: Option<u32>,
}

/// Colour band of a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    /// 70 and above
    Green,
    /// 40 up to 70
    Amber,
    /// Below 40
    Rose,
}

impl ScoreBand {
    pub fn for_score(score: f64) -> Self {
        if score >= 70.0 {
            ScoreBand::Green
        } else if score >= 40.0 {
            ScoreBand::Amber
        } else {
            ScoreBand::Rose
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            ScoreBand::Green => "#16a34a",
            ScoreBand::Amber => "#f59e0b",
            ScoreBand::Rose => "#e11d48",
        }
    }
}

/// Numbers behind a rendered gauge
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeGeometry {
    /// Score after clamping to [0, 100]; NaN becomes 0
    pub score: f64,
    pub half_circumference: f64,
    pub dash_offset: f64,
    pub dash_array: String,
    pub band: ScoreBand,
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

pub fn gauge_geometry(score: f64) -> GaugeGeometry {
    let score = clamp_score(score);
    let half = PI * GAUGE_RADIUS;
    GaugeGeometry {
        score,
        half_circumference: half,
        dash_offset: half * (1.0 - score / 100.0),
        dash_array: format!("{:.2} {:.2}", half, half),
        band: ScoreBand::for_score(score),
    }
}

pub fn render_score_gauge(options: &GaugeOptions) -> String {
    let geometry = gauge_geometry(options.score);
    let arc = format!(
        "M {:.1} {:.1} A {r:.1} {r:.1} 0 0 1 {:.1} {:.1}",
        CENTER_X - GAUGE_RADIUS,
        CENTER_Y,
        CENTER_X + GAUGE_RADIUS,
        CENTER_Y,
        r = GAUGE_RADIUS
    );

    let rank_text = match (options.rank, options.total_cities) {
        (Some(rank), Some(total)) => format!(
            r#"<text class="gauge-rank" x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12">{}</text>"#,
            CENTER_X,
            CENTER_Y + 38.0,
            escape_xml(&format!("{}位 / {}", rank, total))
        ),
        (Some(rank), None) => format!(
            r#"<text class="gauge-rank" x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12">{}</text>"#,
            CENTER_X,
            CENTER_Y + 38.0,
            escape_xml(&format!("{}位", rank))
        ),
        _ => String::new(),
    };

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150" role="img">"#,
            r#"<path class="gauge-track" d="{arc}" fill="none" stroke="{track}" stroke-width="{sw:.1}"/>"#,
            r#"<path class="gauge-value" d="{arc}" fill="none" stroke="{color}" stroke-width="{sw:.1}" "#,
            r#"stroke-dasharray="{dash_array}" stroke-dashoffset="{dash_offset:.2}"/>"#,
            r#"<text class="gauge-score" x="{cx:.1}" y="{score_y:.1}" text-anchor="middle" font-size="28">{score:.1}</text>"#,
            r#"<text class="gauge-label" x="{cx:.1}" y="{label_y:.1}" text-anchor="middle" font-size="13">{label}</text>"#,
            "{rank}</svg>"
        ),
        arc = arc,
        track = TRACK_COLOR,
        sw = STROKE_WIDTH,
        color = geometry.band.color(),
        dash_array = geometry.dash_array,
        dash_offset = geometry.dash_offset,
        cx = CENTER_X,
        score_y = CENTER_Y - 8.0,
        score = geometry.score,
        label_y = CENTER_Y + 20.0,
        label = escape_xml(&options.label),
        rank = rank_text,
    )
}
