//! 学習結果のグラフ出力 (SVG)

use anyhow::{Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;

use crate::ml::evaluation::{ClassificationReport, ConfusionMatrix};
use crate::ml::history::TrainingHistory;

const TRAIN_COLOR: RGBColor = RGBColor(66, 133, 244);
const VAL_COLOR: RGBColor = RGBColor(234, 67, 53);

/// 白から紺へのカラースケール (t: 0.0 - 1.0)
fn blues(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(lerp(247, 8), lerp(251, 48), lerp(255, 107))
}

fn centered(size: u32) -> TextStyle<'static> {
    TextStyle::from(("sans-serif", size).into_font()).pos(Pos::new(HPos::Center, VPos::Center))
}

fn draw_metric_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    y_desc: &str,
    train: &[f64],
    val: &[f64],
) -> Result<()> {
    let epochs = train.len().max(val.len()).max(2) as f64;
    let y_max = train
        .iter()
        .chain(val)
        .fold(0.0f64, |acc, &v| acc.max(v))
        .max(1e-3)
        * 1.1;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 24).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(1f64..epochs, 0f64..y_max)
        .context("Failed to build chart")?;

    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc(y_desc)
        .x_label_formatter(&|x: &f64| format!("{}", x.round()))
        .draw()
        .context("Failed to draw mesh")?;

    for (label, values, color) in [("train", train, TRAIN_COLOR), ("validation", val, VAL_COLOR)] {
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| ((i + 1) as f64, v))
            .collect();
        chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))
            .context("Failed to draw line")?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        chart
            .draw_series(points.into_iter().map(|p| Circle::new(p, 3, color.filled())))
            .context("Failed to draw points")?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .context("Failed to draw legend")?;
    Ok(())
}

/// 精度と損失の推移を左右2枚のグラフで出力
pub fn plot_training_history(history: &TrainingHistory, path: &Path) -> Result<()> {
    let root = SVGBackend::new(path, (1200, 450)).into_drawing_area();
    root.fill(&WHITE).context("Failed to fill drawing area")?;
    let panels = root.split_evenly((1, 2));

    draw_metric_panel(
        &panels[0],
        "Accuracy",
        "Accuracy",
        &history.train_accuracy(),
        &history.val_accuracy(),
    )?;
    draw_metric_panel(&panels[1], "Loss", "Loss", &history.train_loss(), &history.val_loss())?;

    root.present().context("Failed to write training history chart")?;
    Ok(())
}

/// 混同行列をヒートマップとして出力
pub fn plot_confusion_matrix(matrix: &ConfusionMatrix, path: &Path) -> Result<()> {
    let n = matrix.num_classes();
    let names = matrix.class_names();
    let max = matrix.max_count().max(1) as f64;

    let root = SVGBackend::new(path, (800, 700)).into_drawing_area();
    root.fill(&WHITE).context("Failed to fill drawing area")?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Confusion Matrix", ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(110)
        .build_cartesian_2d((0..n).into_segmented(), (0..n).into_segmented())
        .context("Failed to build chart")?;

    // 行0 (先頭クラス) を上に表示するため y 軸は反転して配置
    let x_name = |v: &SegmentValue<usize>| match v {
        SegmentValue::CenterOf(i) if *i < n => names[*i].clone(),
        _ => String::new(),
    };
    let y_name = |v: &SegmentValue<usize>| match v {
        SegmentValue::CenterOf(i) if *i < n => names[n - 1 - *i].clone(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n)
        .y_labels(n)
        .x_label_formatter(&x_name)
        .y_label_formatter(&y_name)
        .x_desc("Predicted")
        .y_desc("Actual")
        .draw()
        .context("Failed to draw mesh")?;

    let cells: Vec<(usize, usize, usize)> = (0..n)
        .flat_map(|actual| (0..n).map(move |predicted| (actual, predicted)))
        .map(|(actual, predicted)| (actual, predicted, matrix.get(actual, predicted)))
        .collect();

    chart
        .draw_series(cells.iter().map(|&(actual, predicted, count)| {
            let row = n - 1 - actual;
            Rectangle::new(
                [
                    (SegmentValue::Exact(predicted), SegmentValue::Exact(row)),
                    (SegmentValue::Exact(predicted + 1), SegmentValue::Exact(row + 1)),
                ],
                blues(count as f64 / max).filled(),
            )
        }))
        .context("Failed to draw cells")?;

    chart
        .draw_series(cells.iter().map(|&(actual, predicted, count)| {
            let style = if count as f64 / max > 0.5 {
                centered(18).color(&WHITE)
            } else {
                centered(18).color(&BLACK)
            };
            Text::new(
                count.to_string(),
                (SegmentValue::CenterOf(predicted), SegmentValue::CenterOf(n - 1 - actual)),
                style,
            )
        }))
        .context("Failed to draw counts")?;

    root.present().context("Failed to write confusion matrix chart")?;
    Ok(())
}

/// クラスごとのF1スコアを棒グラフで出力
pub fn plot_f1_scores(report: &ClassificationReport, path: &Path) -> Result<()> {
    let n = report.per_class.len();

    let root = SVGBackend::new(path, (900, 500)).into_drawing_area();
    root.fill(&WHITE).context("Failed to fill drawing area")?;

    let mut chart = ChartBuilder::on(&root)
        .caption("F1 Score per Class", ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d((0..n).into_segmented(), 0f64..1.1f64)
        .context("Failed to build chart")?;

    let name = |v: &SegmentValue<usize>| match v {
        SegmentValue::CenterOf(i) if *i < n => report.per_class[*i].name.clone(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&name)
        .x_desc("Class")
        .y_desc("F1 Score")
        .draw()
        .context("Failed to draw mesh")?;

    chart
        .draw_series(report.per_class.iter().enumerate().map(|(i, m)| {
            Rectangle::new(
                [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), m.f1)],
                TRAIN_COLOR.mix(0.85).filled(),
            )
        }))
        .context("Failed to draw bars")?;

    chart
        .draw_series(report.per_class.iter().enumerate().map(|(i, m)| {
            Text::new(
                format!("{:.2}", m.f1),
                (SegmentValue::CenterOf(i), m.f1 + 0.04),
                centered(16),
            )
        }))
        .context("Failed to draw values")?;

    root.present().context("Failed to write F1 chart")?;
    Ok(())
}
