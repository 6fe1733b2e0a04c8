//! 学習済みモデルの構造を表示
//!
//! 使い方: cargo run --bin model_info -- --model models/rice_model.tar.gz

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use burn::backend::NdArray;
use burn_ndarray::NdArrayDevice;
use rice_classifier_lib::ml::{describe_layers, format_shape, inspect, InferenceEngine, LayerSummary, ModelConfig};
use rice_classifier_lib::model::{load_model_with_metadata, print_metadata_info, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "model_info", about = "Inspect a trained rice classifier archive", long_about = None)]
struct Args {
    /// 設定ファイル
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// モデルアーカイブ (省略時は設定の model_path)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// ラベルファイル (省略時は設定の labels_path)
    #[arg(short, long)]
    labels: Option<PathBuf>,
}

fn print_layer(title: &str, layer: &LayerSummary) {
    println!("{}: {} ({})", title, layer.name, layer.kind);
    println!("  入力形状: {}", format_shape(&layer.input_shape));
    println!("  出力形状: {}", format_shape(&layer.output_shape));
    println!("  パラメータ数: {}", layer.params);
}

fn main() -> Result<()> {
    rice_classifier_lib::logging::init();

    let args = Args::parse();
    let config = AppConfig::load_or_default_from(&args.config);
    let model_path = args.model.unwrap_or_else(|| PathBuf::from(&config.model.model_path));
    let labels_path = args.labels.unwrap_or_else(|| PathBuf::from(&config.model.labels_path));

    let (metadata, _) = load_model_with_metadata(&model_path)
        .with_context(|| format!("モデルを読み込めません: {}", model_path.display()))?;
    print_metadata_info(&metadata);

    let engine = InferenceEngine::<NdArray<f32>>::load(&model_path, &labels_path, NdArrayDevice::Cpu)?;

    engine.config().print_info();

    println!("\n=== 入出力 ===");
    println!("入力形状: {}", format_shape(&engine.input_dims()));
    println!("出力形状: {}", format_shape(&engine.output_dims()));

    let model_config = ModelConfig::new(metadata.num_classes())
        .with_dropout(metadata.dropout)
        .with_image_size(metadata.model_input_size as usize);
    let layers = describe_layers(&model_config, 1);

    println!("\n=== 先頭レイヤー ===");
    if let Some(first) = layers.first() {
        print_layer("Layer 0", first);
    }

    println!("\n=== 最後の3レイヤー ===");
    let start = layers.len().saturating_sub(3);
    for (i, layer) in layers.iter().enumerate().skip(start) {
        print_layer(&format!("Layer {}", i), layer);
    }

    inspect::print_summary(&model_config);

    println!("\n=== 各レイヤーの出力形状 (ゼロ入力) ===");
    let (prediction, trace) = engine.trace_zero_input()?;
    for activation in &trace {
        println!("{:<18} {}", activation.name, format_shape(&activation.shape));
    }
    println!("出力確率の合計: {:.4}", prediction.sum());

    Ok(())
}
