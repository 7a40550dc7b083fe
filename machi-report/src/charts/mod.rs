//! SVG chart renderers
//!
//! Renderers are pure functions from numbers and labels to SVG markup. Every
//! caller-supplied string is emitted as an escaped text node.

pub mod bar_chart;
pub mod score_gauge;

pub use bar_chart::{render_horizontal_bar_chart, BarChartOptions, BarItem};
pub use score_gauge::{gauge_geometry, render_score_gauge, GaugeGeometry, GaugeOptions, ScoreBand};

/// Escape text for use in SVG text nodes and attribute values
pub fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
