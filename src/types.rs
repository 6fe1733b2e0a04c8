use serde::Serialize;

use crate::ml::Prediction;

/// 確率バーのトラック幅 (px)
pub const BAR_TRACK_WIDTH: u32 = 250;
/// 最上位クラスのバー色
pub const HIGHLIGHT_COLOR: &str = "#4285F4";
/// その他のバー色
pub const BAR_COLOR: &str = "#D0D0D0";
/// 画像未分類時の結果表示
pub const DEFAULT_RESULT_TEXT: &str = "Result: -";

/// 確率バー1本分の表示内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilityBar {
    pub label: String,
    pub probability: f32,
    pub percent_text: String,
    pub width: u32,
    pub color: &'static str,
}

/// 分類結果の表示内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationView {
    pub result_text: String,
    pub bars: Vec<ProbabilityBar>,
}

/// 画像読み込み後の表示内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedImage {
    pub file_name: String,
    /// プレビュー画像 (data:image/png;base64,...)
    pub preview: String,
    pub preview_width: u32,
    pub preview_height: u32,
    pub view: ClassificationView,
}

pub fn format_percent(probability: f32) -> String {
    format!("{:.2}%", probability * 100.0)
}

/// 確率からバーの塗り幅を計算
///
/// 確率0のクラスは1pxだけ描画します。
pub fn bar_width(probability: f32) -> u32 {
    if probability > 0.0 {
        ((BAR_TRACK_WIDTH as f32 * probability).floor() as u32).min(BAR_TRACK_WIDTH)
    } else {
        1
    }
}

pub fn result_text(label: &str, probability: f32) -> String {
    format!("Result: {} ({})", label, format_percent(probability))
}

/// 全クラスを0%で並べた初期表示
pub fn default_bars(labels: &[String]) -> Vec<ProbabilityBar> {
    labels
        .iter()
        .map(|label| ProbabilityBar {
            label: label.clone(),
            probability: 0.0,
            percent_text: format_percent(0.0),
            width: 0,
            color: BAR_COLOR,
        })
        .collect()
}

pub fn default_view(labels: &[String]) -> ClassificationView {
    ClassificationView {
        result_text: DEFAULT_RESULT_TEXT.to_string(),
        bars: default_bars(labels),
    }
}

/// 確率の降順にバーを並べる
pub fn probability_bars(labels: &[String], prediction: &Prediction) -> Vec<ProbabilityBar> {
    prediction
        .ranked()
        .into_iter()
        .enumerate()
        .map(|(rank, (index, probability))| ProbabilityBar {
            label: labels.get(index).cloned().unwrap_or_else(|| index.to_string()),
            probability,
            percent_text: format_percent(probability),
            width: bar_width(probability),
            color: if rank == 0 { HIGHLIGHT_COLOR } else { BAR_COLOR },
        })
        .collect()
}

pub fn classification_view(labels: &[String], prediction: &Prediction) -> ClassificationView {
    let bars = probability_bars(labels, prediction);
    let result_text = match bars.first() {
        Some(top) => result_text(&top.label, top.probability),
        None => DEFAULT_RESULT_TEXT.to_string(),
    };
    ClassificationView { result_text, bars }
}
