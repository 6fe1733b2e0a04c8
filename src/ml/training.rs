//! モデル学習
//!
//! データセットの読み込みから学習ループ、評価、成果物の保存までを行います。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    backend::{Autodiff, NdArray, Wgpu},
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_ndarray::NdArrayDevice;
use burn_wgpu::WgpuDevice;
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::charts;
use crate::error::ClassifierError;
use crate::ml::augmentation::Augmenter;
use crate::ml::dataset::{RiceBatch, RiceBatcher, RiceDataset, RiceItem};
use crate::ml::evaluation::{ClassificationReport, ConfusionMatrix};
use crate::ml::history::{EpochMetrics, TrainingHistory};
use crate::ml::inspect;
use crate::ml::ml_model::{ModelConfig, RiceClassifier, IMAGE_CHANNELS};
use crate::model::{save_class_labels, save_model_with_metadata, AppConfig, DeviceType, ModelMetadata};

/// 検証損失による早期終了
///
/// 損失が `patience` エポック連続で改善しなかった時点で停止を指示し、
/// 最良エポックの状態を保持します。
#[derive(Debug, Clone)]
pub struct EarlyStopping<M> {
    patience: usize,
    best_loss: f64,
    best_epoch: Option<usize>,
    wait: usize,
    best_state: Option<M>,
}

impl<M: Clone> EarlyStopping<M> {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            best_state: None,
        }
    }

    /// エポック終了時に呼び出す。停止すべき場合は true
    pub fn update(&mut self, epoch: usize, val_loss: f64, state: &M) -> bool {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.best_epoch = Some(epoch);
            self.best_state = Some(state.clone());
            self.wait = 0;
            false
        } else {
            self.wait += 1;
            self.wait >= self.patience
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// 最良エポックの状態を取り出す
    pub fn into_best(self) -> Option<M> {
        self.best_state
    }
}

/// 検証精度が更新されたときだけチェックポイントを保存する
#[derive(Debug, Clone, Copy)]
pub struct BestCheckpoint {
    best_accuracy: f64,
}

impl Default for BestCheckpoint {
    fn default() -> Self {
        Self {
            best_accuracy: f64::NEG_INFINITY,
        }
    }
}

impl BestCheckpoint {
    /// これまでの最高値を上回れば記録して true
    pub fn improved(&mut self, val_accuracy: f64) -> bool {
        if val_accuracy > self.best_accuracy {
            self.best_accuracy = val_accuracy;
            true
        } else {
            false
        }
    }

    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }
}

/// 評価結果
#[derive(Debug, Clone)]
struct EvalResult {
    loss: f64,
    accuracy: f64,
    confusion: ConfusionMatrix,
}

/// 学習の成果物
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub class_names: Vec<String>,
    pub history: TrainingHistory,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
    pub epochs_run: usize,
    pub stopped_early: bool,
    /// 早期終了で重みを戻したエポック
    pub restored_epoch: Option<usize>,
    pub best_val_accuracy: f64,
}

fn create_progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Failed to set progress bar template")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn batch_items(dataset: &RiceDataset, indices: &[usize]) -> Vec<RiceItem> {
    indices.iter().filter_map(|&i| dataset.get(i)).collect()
}

fn to_indices<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow::anyhow!("テンソルの取得エラー: {:?}", e))?;
    Ok(values.into_iter().map(|v| v as usize).collect())
}

/// 検証データ全体で損失・精度・混同行列を計算
fn evaluate<B: Backend>(
    model: &RiceClassifier<B>,
    dataset: &RiceDataset,
    batcher: &RiceBatcher<B>,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvalResult> {
    let mut confusion = ConfusionMatrix::new(dataset.class_names());
    let mut total_loss = 0.0f64;
    let mut total = 0usize;

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(batch_size) {
        let items = batch_items(dataset, chunk);
        if items.is_empty() {
            continue;
        }
        let RiceBatch { images, targets } = batcher.batch(items, device)?;
        let n = targets.dims()[0];

        let output = model.forward(images);
        let loss: f64 = CrossEntropyLossConfig::new()
            .init(device)
            .forward(output.clone(), targets.clone())
            .into_scalar()
            .elem();
        total_loss += loss * n as f64;
        total += n;

        let predicted = to_indices(output.argmax(1).reshape([n]))?;
        let actual = to_indices(targets)?;
        for (a, p) in actual.into_iter().zip(predicted) {
            confusion.record(a, p);
        }
    }

    let accuracy = if total == 0 {
        0.0
    } else {
        confusion.correct() as f64 / total as f64
    };

    Ok(EvalResult {
        loss: total_loss / total.max(1) as f64,
        accuracy,
        confusion,
    })
}

fn save_checkpoint<B: AutodiffBackend>(
    model: &RiceClassifier<B>,
    config: &AppConfig,
    class_names: &[String],
    epochs_run: usize,
    val_accuracy: f64,
) -> Result<PathBuf> {
    let bytes = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().valid().into_record(), ())
        .map_err(|e| ClassifierError::Record(format!("{:?}", e)))?;

    let metadata = ModelMetadata::new(
        class_names.to_vec(),
        config.model.image_size as u32,
        config.model.dropout,
        config.training.num_epochs as u32,
        epochs_run as u32,
        val_accuracy,
    );
    save_model_with_metadata(Path::new(&config.model.model_path), &metadata, &bytes)
}

/// ゼロ画像で推論できることを確認
fn smoke_test<B: Backend>(model: &RiceClassifier<B>, class_names: &[String], image_size: usize, device: &B::Device) {
    let input = Tensor::<B, 4>::zeros([1, IMAGE_CHANNELS, image_size, image_size], device);
    let probs = softmax(model.forward(input), 1);
    match probs.into_data().convert::<f32>().to_vec::<f32>() {
        Ok(values) => {
            let top = values
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, p)| (class_names.get(i).map(String::as_str).unwrap_or("?"), *p));
            match top {
                Some((name, p)) => log::info!("動作確認: ゼロ画像の予測 = {} ({:.2}%)", name, p * 100.0),
                None => log::warn!("動作確認: 予測結果が空です"),
            }
        }
        Err(e) => log::error!("動作確認に失敗しました: {:?}", e),
    }
}

/// 設定のバックエンドで学習を実行
pub fn train_with_config(config: &AppConfig) -> Result<TrainingOutcome> {
    config.validate()?;
    log::info!("使用デバイス: {}", config.device_type);
    match config.device_type {
        DeviceType::Wgpu => train::<Autodiff<Wgpu>>(config, WgpuDevice::default()),
        DeviceType::Cpu => train::<Autodiff<NdArray>>(config, NdArrayDevice::Cpu),
    }
}

/// モデル学習を実行
pub fn train<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<TrainingOutcome> {
    config.validate()?;
    let training = &config.training;
    let image_size = config.model.image_size;
    let batch_size = training.batch_size;

    // === データセット ===
    let data_dir = Path::new(&training.data_dir);
    let dataset = RiceDataset::from_directory(data_dir)
        .with_context(|| format!("データセットの読み込みに失敗しました: {}", data_dir.display()))?;
    dataset.log_statistics("データセット");

    let class_names = dataset.class_names().to_vec();
    let (train_set, valid_set) = dataset.split(training.validation_split);
    if train_set.is_empty() {
        return Err(ClassifierError::EmptyDataset(data_dir.to_path_buf()).into());
    }
    if valid_set.is_empty() {
        return Err(ClassifierError::InvalidConfig(format!(
            "検証データが0枚です (validation_split = {})",
            training.validation_split
        ))
        .into());
    }
    train_set.log_statistics("学習データ");
    valid_set.log_statistics("検証データ");

    let steps_per_epoch = train_set.len().div_ceil(batch_size);
    log::info!(
        "エポック数: {}, バッチサイズ: {}, 1エポックあたり {} ステップ",
        training.num_epochs,
        batch_size,
        steps_per_epoch
    );

    // === モデル ===
    let model_config = ModelConfig::new(class_names.len())
        .with_dropout(config.model.dropout)
        .with_image_size(image_size);
    inspect::print_summary(&model_config);

    let mut model: RiceClassifier<B> = model_config.init(&device)?;
    let mut optimizer = AdamConfig::new().init();

    let train_batcher = RiceBatcher::<B>::new(device.clone(), image_size)
        .with_augmentation(Augmenter::new(config.augmentation.clone()), training.seed);
    let valid_batcher = RiceBatcher::<B::InnerBackend>::new(device.clone(), image_size);

    let mut rng = StdRng::seed_from_u64(training.seed);
    let mut history = TrainingHistory::default();
    let mut early_stopping = EarlyStopping::new(training.early_stopping_patience);
    let mut checkpoint = BestCheckpoint::default();
    let mut model_path = None;
    let mut stopped_early = false;

    for epoch in 1..=training.num_epochs {
        let mut indices: Vec<usize> = (0..train_set.len()).collect();
        indices.shuffle(&mut rng);

        let pb = create_progress_bar(steps_per_epoch as u64)?;
        pb.set_prefix(format!("Epoch {}/{}", epoch, training.num_epochs));

        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for chunk in indices.chunks(batch_size) {
            let items = batch_items(&train_set, chunk);
            if items.is_empty() {
                continue;
            }
            let RiceBatch { images, targets } = train_batcher.batch(items, &device)?;
            let n = targets.dims()[0];

            let output = model.forward_classification(images, targets);
            let loss_value: f64 = output.loss.clone().into_scalar().elem();
            let batch_correct: i64 = output
                .output
                .clone()
                .argmax(1)
                .reshape([n])
                .equal(output.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();

            loss_sum += loss_value * n as f64;
            correct += batch_correct as usize;
            seen += n;

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optimizer.step(training.learning_rate, model, grads);

            pb.set_message(format!(
                "loss {:.4} acc {:.4}",
                loss_sum / seen as f64,
                correct as f64 / seen as f64
            ));
            pb.inc(1);
        }
        pb.finish();

        let eval = evaluate(&model.valid(), &valid_set, &valid_batcher, batch_size, &device)?;
        let metrics = EpochMetrics {
            epoch,
            train_loss: loss_sum / seen.max(1) as f64,
            train_accuracy: correct as f64 / seen.max(1) as f64,
            val_loss: eval.loss,
            val_accuracy: eval.accuracy,
        };
        log::info!(
            "Epoch {}/{}: loss {:.4} - accuracy {:.4} - val_loss {:.4} - val_accuracy {:.4}",
            epoch,
            training.num_epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.val_loss,
            metrics.val_accuracy
        );
        history.push(metrics);

        if checkpoint.improved(eval.accuracy) {
            let path = save_checkpoint(&model, config, &class_names, epoch, eval.accuracy)?;
            log::info!("val_accuracy が改善しました ({:.4}): {} に保存", eval.accuracy, path.display());
            model_path = Some(path);
        }

        if early_stopping.update(epoch, eval.loss, &model) {
            log::info!(
                "早期終了: {} エポック val_loss が改善しませんでした (最良: エポック {:?}, {:.4})",
                training.early_stopping_patience,
                early_stopping.best_epoch(),
                early_stopping.best_loss()
            );
            stopped_early = true;
            break;
        }
    }

    let mut restored_epoch = None;
    if stopped_early {
        restored_epoch = early_stopping.best_epoch();
        if let Some(best) = early_stopping.into_best() {
            log::info!("エポック {:?} の重みを復元しました", restored_epoch);
            model = best;
        }
    }

    let model_path = model_path.ok_or_else(|| {
        ClassifierError::InvalidConfig("チェックポイントが保存されませんでした".to_string())
    })?;

    // === 評価 ===
    let inner_model = model.valid();
    let eval = evaluate(&inner_model, &valid_set, &valid_batcher, batch_size, &device)?;
    let report = ClassificationReport::from_confusion_matrix(&eval.confusion);
    println!("\n=== 分類レポート ===");
    println!("{}", report);
    println!("{}", eval.confusion);
    log::info!(
        "検証精度: {:.4}, 重み付きF1スコア: {:.4}",
        report.accuracy,
        report.weighted_f1()
    );

    // === 成果物 ===
    let labels_path = PathBuf::from(&config.model.labels_path);
    save_class_labels(&labels_path, &class_names)?;
    log::info!("クラス名を保存しました: {}", labels_path.display());

    let report_dir = Path::new(&training.report_dir);
    std::fs::create_dir_all(report_dir)
        .with_context(|| format!("Failed to create report directory: {:?}", report_dir))?;
    history.save(report_dir.join("training_history.json"))?;
    charts::plot_training_history(&history, &report_dir.join("training_history.svg"))?;
    charts::plot_confusion_matrix(&eval.confusion, &report_dir.join("confusion_matrix.svg"))?;
    charts::plot_f1_scores(&report, &report_dir.join("f1_scores.svg"))?;
    log::info!("学習履歴とグラフを保存しました: {}", report_dir.display());

    smoke_test(&inner_model, &class_names, image_size, &device);
    inspect::print_summary(&model_config);

    Ok(TrainingOutcome {
        model_path,
        labels_path,
        class_names,
        epochs_run: history.len(),
        history,
        confusion: eval.confusion,
        report,
        stopped_early,
        restored_epoch,
        best_val_accuracy: checkpoint.best_accuracy(),
    })
}
