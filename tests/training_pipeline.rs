//! 小さな合成データセットでの学習から推論までの通し確認

use std::path::Path;

use burn::backend::{Autodiff, NdArray};
use burn_ndarray::NdArrayDevice;
use image::{DynamicImage, Rgb, RgbImage};

use rice_classifier_lib::ml::{train, InferenceEngine, TrainingHistory};
use rice_classifier_lib::{classification_view, load_engine};
use rice_classifier_lib::model::{load_class_labels, load_metadata, AppConfig, DeviceType};

const IMAGE_SIZE: usize = 16;

fn write_class(root: &Path, name: &str, color: [u8; 3], count: usize) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let mut img = RgbImage::from_pixel(24, 20, Rgb([10, 10, 10]));
        // 中央に「米粒」を描く
        for y in 6..14 {
            for x in (4 + i as u32 % 3)..(18 + i as u32 % 3) {
                img.put_pixel(x, y, Rgb(color));
            }
        }
        img.save(dir.join(format!("{name} ({i}).jpg"))).unwrap();
    }
}

/// 検証精度が最初に最大となったエポック (1始まり)
fn first_best_epoch(history: &TrainingHistory) -> usize {
    let accuracies = history.val_accuracy();
    let best = accuracies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    accuracies.iter().position(|&a| a == best).unwrap() + 1
}

fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.device_type = DeviceType::Cpu;
    config.model.image_size = IMAGE_SIZE;
    config.model.model_path = root.join("models/rice_model.tar.gz").display().to_string();
    config.model.labels_path = root.join("models/class_names.json").display().to_string();
    config.training.data_dir = root.join("dataset").display().to_string();
    config.training.report_dir = root.join("reports").display().to_string();
    config.training.num_epochs = 2;
    config.training.batch_size = 4;
    config
}

#[test]
fn test_train_then_classify() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    write_class(&dataset, "Basmati", [240, 230, 200], 6);
    write_class(&dataset, "Arborio", [200, 160, 90], 6);

    let config = test_config(dir.path());
    let outcome = train::<Autodiff<NdArray>>(&config, NdArrayDevice::Cpu).unwrap();

    // ラベルはフォルダ名のアルファベット順
    assert_eq!(outcome.class_names, vec!["Arborio", "Basmati"]);
    assert!(outcome.epochs_run >= 1 && outcome.epochs_run <= 2);
    assert_eq!(outcome.confusion.total(), 2);
    assert!(outcome.model_path.exists());

    let labels = load_class_labels(&outcome.labels_path).unwrap();
    assert_eq!(labels, outcome.class_names);

    let metadata = load_metadata(&outcome.model_path).unwrap();
    assert_eq!(metadata.class_labels, labels);
    assert_eq!(metadata.model_input_size as usize, IMAGE_SIZE);
    // アーカイブは検証精度が最初に最高となったエポックのもの
    assert_eq!(metadata.epochs_run as usize, first_best_epoch(&outcome.history));
    assert!((metadata.best_val_accuracy - outcome.best_val_accuracy).abs() < 1e-12);

    let reports = Path::new(&config.training.report_dir);
    for file in ["training_history.svg", "confusion_matrix.svg", "f1_scores.svg"] {
        assert!(reports.join(file).exists(), "{file} が出力されていません");
    }
    let history = TrainingHistory::load(reports.join("training_history.json")).unwrap();
    assert_eq!(history.len(), outcome.epochs_run);

    let engine = InferenceEngine::<NdArray>::load(&outcome.model_path, &outcome.labels_path, NdArrayDevice::Cpu)
        .unwrap();
    assert_eq!(engine.output_dims()[1], engine.class_names().len());

    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 30, Rgb([200, 160, 90])));
    let prediction = engine.predict(&img).unwrap();
    assert!((prediction.sum() - 1.0).abs() < 1e-4);

    let view = classification_view(engine.class_names(), &prediction);
    let top = prediction.top_index().unwrap();
    assert_eq!(view.bars[0].label, engine.class_names()[top]);
    assert!(view.result_text.contains(&engine.class_names()[top]));
}

#[test]
fn test_mismatched_label_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    write_class(&dataset, "Ipsala", [250, 250, 250], 5);
    write_class(&dataset, "Jasmine", [180, 180, 120], 5);

    let mut config = test_config(dir.path());
    config.training.num_epochs = 1;
    let outcome = train::<Autodiff<NdArray>>(&config, NdArrayDevice::Cpu).unwrap();

    let wrong_labels = dir.path().join("wrong.json");
    std::fs::write(&wrong_labels, r#"["Ipsala", "Jasmine", "Karacadag"]"#).unwrap();

    let result = InferenceEngine::<NdArray>::load(&outcome.model_path, &wrong_labels, NdArrayDevice::Cpu);
    assert!(result.is_err());
}

#[test]
fn test_plateau_triggers_early_stopping_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    write_class(&dataset, "Basmati", [240, 230, 200], 6);
    write_class(&dataset, "Arborio", [200, 160, 90], 6);

    let mut config = test_config(dir.path());
    config.training.num_epochs = 5;
    config.training.early_stopping_patience = 1;
    // 重みが実質的に変化しないため val_loss は横ばいになる
    config.training.learning_rate = 1e-30;
    let outcome = train::<Autodiff<NdArray>>(&config, NdArrayDevice::Cpu).unwrap();

    assert!(outcome.stopped_early);
    assert_eq!(outcome.epochs_run, 2);
    assert_eq!(outcome.restored_epoch, Some(1));

    let val_loss = outcome.history.val_loss();
    assert_eq!(val_loss[0], val_loss[1]);

    // 精度も横ばいなので、チェックポイントは1エポック目のまま
    let metadata = load_metadata(&outcome.model_path).unwrap();
    assert_eq!(metadata.epochs_run, 1);
    assert_eq!(metadata.num_epochs, 5);
    assert!((metadata.best_val_accuracy - outcome.best_val_accuracy).abs() < 1e-12);
}

#[test]
fn test_model_path_without_extension_loads_in_gui() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset");
    write_class(&dataset, "Jasmine", [230, 220, 160], 5);
    write_class(&dataset, "Karacadag", [120, 90, 60], 5);

    let mut config = test_config(dir.path());
    config.training.num_epochs = 1;
    config.model.model_path = dir.path().join("models/rice_model").display().to_string();
    let outcome = train::<Autodiff<NdArray>>(&config, NdArrayDevice::Cpu).unwrap();
    assert!(outcome.model_path.ends_with("rice_model.tar.gz"));

    // 設定に書かれたままのパスで GUI 起動時と同じ読み込みを行う
    let engine = load_engine(&config).unwrap();
    assert_eq!(engine.class_names(), ["Jasmine", "Karacadag"]);
}
