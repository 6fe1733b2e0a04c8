//! 米粒分類モデルの学習
//!
//! 使い方: cargo run --release --bin train -- --data-dir Rice_Image_Dataset --epochs 5

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rice_classifier_lib::ml::train_with_config;
use rice_classifier_lib::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the rice variety classifier", long_about = None)]
struct Args {
    /// 設定ファイル (存在しない場合は既定値)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// クラスごとのサブフォルダを持つデータディレクトリ
    #[arg(short, long)]
    data_dir: Option<String>,

    /// エポック数
    #[arg(short, long)]
    epochs: Option<usize>,

    /// バッチサイズ
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// 学習率
    #[arg(long)]
    learning_rate: Option<f64>,

    /// 計算デバイス (wgpu / cpu)
    #[arg(long)]
    device: Option<DeviceType>,

    /// モデルアーカイブの出力先
    #[arg(short, long)]
    output: Option<String>,

    /// ラベルファイルの出力先
    #[arg(long)]
    labels: Option<String>,

    /// グラフ・学習履歴の出力先
    #[arg(long)]
    report_dir: Option<String>,

    /// ランダムシード
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn apply(self, mut config: AppConfig) -> AppConfig {
        if let Some(v) = self.data_dir {
            config.training.data_dir = v;
        }
        if let Some(v) = self.epochs {
            config.training.num_epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.training.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.training.learning_rate = v;
        }
        if let Some(v) = self.device {
            config.device_type = v;
        }
        if let Some(v) = self.output {
            config.model.model_path = v;
        }
        if let Some(v) = self.labels {
            config.model.labels_path = v;
        }
        if let Some(v) = self.report_dir {
            config.training.report_dir = v;
        }
        if let Some(v) = self.seed {
            config.training.seed = v;
        }
        config
    }
}

fn main() -> Result<()> {
    rice_classifier_lib::logging::init();

    let args = Args::parse();
    let config = AppConfig::load_or_default_from(&args.config);
    let config = args.apply(config);
    config.validate().context("設定が不正です")?;
    config.display();

    let outcome = train_with_config(&config)?;

    println!("\n=== 学習完了 ===");
    println!("エポック数: {}{}", outcome.epochs_run, if outcome.stopped_early { " (早期終了)" } else { "" });
    println!("最高検証精度: {:.4}", outcome.best_val_accuracy);
    println!("重み付きF1スコア: {:.4}", outcome.report.weighted_f1());
    println!("モデル: {}", outcome.model_path.display());
    println!("クラス名: {}", outcome.labels_path.display());
    Ok(())
}
