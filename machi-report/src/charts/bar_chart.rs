//! Horizontal bar chart
//!
//! One row per item: label on the left, bar proportional to the largest
//! value, optional value text at the end of the bar.

use super::escape_xml;
use serde::{Deserialize, Serialize};

const WIDTH: f64 = 480.0;
const LABEL_WIDTH: f64 = 140.0;
const BAR_AREA: f64 = 280.0;
const ROW_HEIGHT: f64 = 28.0;
const BAR_HEIGHT: f64 = 18.0;
const PADDING: f64 = 10.0;
const BAR_COLOR: &str = "#2563eb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarItem {
    pub label: String,
    pub value: f64,
}

impl BarItem {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarChartOptions {
    pub show_values: bool,
}

impl Default for BarChartOptions {
    fn default() -> Self {
        Self { show_values: true }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Width of each bar in chart units; all zero when the maximum is not positive
pub fn bar_widths(items: &[BarItem]) -> Vec<f64> {
    let max = items
        .iter()
        .map(|item| finite_or_zero(item.value))
        .fold(f64::NEG_INFINITY, f64::max);

    items
        .iter()
        .map(|item| {
            if max > 0.0 {
                finite_or_zero(item.value).max(0.0) / max * BAR_AREA
            } else {
                0.0
            }
        })
        .collect()
}

/// Render items as an SVG horizontal bar chart; empty input renders nothing
pub fn render_horizontal_bar_chart(items: &[BarItem], options: BarChartOptions) -> String {
    if items.is_empty() {
        return String::new();
    }

    let height = PADDING * 2.0 + ROW_HEIGHT * items.len() as f64;
    let mut rows = String::new();

    for (idx, (item, width)) in items.iter().zip(bar_widths(items)).enumerate() {
        let y = PADDING + ROW_HEIGHT * idx as f64;
        let text_y = y + BAR_HEIGHT / 2.0 + 4.0;

        rows.push_str(&format!(
            r#"<text class="bar-label" x="{:.1}" y="{:.1}" text-anchor="end" font-size="12">{}</text>"#,
            LABEL_WIDTH - 6.0,
            text_y,
            escape_xml(&item.label)
        ));
        rows.push_str(&format!(
            r#"<rect class="bar" x="{:.1}" y="{:.1}" width="{:.2}" height="{:.1}" fill="{}"/>"#,
            LABEL_WIDTH, y, width, BAR_HEIGHT, BAR_COLOR
        ));

        if options.show_values {
            rows.push_str(&format!(
                r#"<text class="bar-value" x="{:.1}" y="{:.1}" font-size="12">{}</text>"#,
                LABEL_WIDTH + width + 4.0,
                text_y,
                escape_xml(&format!("{:.1}", finite_or_zero(item.value)))
            ));
        }
    }

    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" role="img">{rows}</svg>"#,
        w = WIDTH,
        h = height,
        rows = rows
    )
}
