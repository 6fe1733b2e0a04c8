//! モデル推論機能

use anyhow::{Context, Result};
use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use image::DynamicImage;

use crate::error::ClassifierError;
use crate::ml::ml_model::{LayerActivation, ModelConfig, RiceClassifier, IMAGE_CHANNELS};
use crate::ml::preprocess::{normalize_image, ImageTensorData};
use crate::model::{load_class_labels, load_model_with_metadata, InferenceConfig, ModelMetadata};

/// 1枚分の推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// クラスごとの確率（ラベル順）
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// 最も確率の高いクラス
    pub fn top_index(&self) -> Option<usize> {
        self.ranked().first().map(|(i, _)| *i)
    }

    /// 確率の降順に並べた (クラス, 確率)
    ///
    /// 同率の場合はラベル順を保ちます。
    pub fn ranked(&self) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn sum(&self) -> f32 {
        self.probabilities.iter().sum()
    }
}

fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: RiceClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルアーカイブとラベルファイルを読み込んで初期化
    ///
    /// ラベルファイルはアーカイブ内のラベルと件数・順序が一致し、
    /// かつモデルの出力次元と一致している必要があります。
    pub fn load(model_path: &Path, labels_path: &Path, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .with_context(|| format!("モデルの読み込みに失敗しました: {}", model_path.display()))?;
        let labels = load_class_labels(labels_path).with_context(|| {
            format!("ラベルファイルの読み込みに失敗しました: {}", labels_path.display())
        })?;

        let config = InferenceConfig::from_metadata(&metadata);
        config.verify_labels(&labels)?;

        let engine = Self::from_bytes(&metadata, model_binary, device)?;
        engine.verify_output_dim()?;

        log::info!(
            "モデルを読み込みました: {} ({} クラス)",
            model_path.display(),
            engine.config.num_total_classes()
        );
        Ok(engine)
    }

    /// メタデータと重みバイナリから初期化
    pub fn from_bytes(metadata: &ModelMetadata, model_binary: Vec<u8>, device: B::Device) -> Result<Self> {
        let config = InferenceConfig::from_metadata(metadata);
        let model = Self::model_config(&config, metadata.dropout).init::<B>(&device)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| ClassifierError::Record(format!("{:?}", e)))?;
        let model = model.load_record(record);

        Ok(Self {
            model,
            config,
            device,
        })
    }

    /// 学習済みモデルから直接作成
    pub fn from_model(model: RiceClassifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    fn model_config(config: &InferenceConfig, dropout: f64) -> ModelConfig {
        ModelConfig::new(config.num_total_classes())
            .with_dropout(dropout)
            .with_image_size(config.model_input_size)
    }

    /// ゼロ画像で推論し、出力次元がラベル数と一致するか確認
    pub fn verify_output_dim(&self) -> Result<(), ClassifierError> {
        let outputs = self.model.forward(self.zero_input()).dims()[1];
        let labels = self.config.num_total_classes();
        if outputs != labels {
            return Err(ClassifierError::LabelMismatch { labels, outputs });
        }
        Ok(())
    }

    fn input_shape(&self) -> [usize; 4] {
        let size = self.config.model_input_size;
        [1, IMAGE_CHANNELS, size, size]
    }

    fn zero_input(&self) -> Tensor<B, 4> {
        Tensor::zeros(self.input_shape(), &self.device)
    }

    /// 画像を分類
    pub fn predict(&self, img: &DynamicImage) -> Result<Prediction> {
        let data = normalize_image(img, self.config.model_input_size);
        self.predict_data(&data)
    }

    /// 前処理済みデータを分類
    pub fn predict_data(&self, data: &ImageTensorData) -> Result<Prediction> {
        let tensor = Tensor::<B, 1>::from_floats(data.data.as_slice(), &self.device).reshape(data.shape);
        let probabilities = tensor_to_vec(self.model.predict_proba(tensor))?;
        Ok(Prediction { probabilities })
    }

    /// ゼロ画像を入力し、各レイヤーの出力形状を取得
    pub fn trace_zero_input(&self) -> Result<(Prediction, Vec<LayerActivation>)> {
        let (probs, trace) = self.model.forward_traced(self.zero_input());
        Ok((
            Prediction {
                probabilities: tensor_to_vec(probs)?,
            },
            trace,
        ))
    }

    /// モデル入力形状 [1, 3, size, size]
    pub fn input_dims(&self) -> [usize; 4] {
        self.input_shape()
    }

    /// モデル出力形状 [1, num_classes]
    pub fn output_dims(&self) -> [usize; 2] {
        [1, self.config.num_total_classes()]
    }

    pub fn class_names(&self) -> &[String] {
        &self.config.class_labels
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{save_class_labels, save_model_with_metadata};
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    const SIZE: usize = 20;

    fn labels() -> Vec<String> {
        vec!["Arborio".into(), "Basmati".into(), "Ipsala".into()]
    }

    fn write_model(dir: &Path, labels: &[String], outputs: usize) -> (std::path::PathBuf, std::path::PathBuf) {
        let device = Default::default();
        let model = ModelConfig::new(outputs)
            .with_image_size(SIZE)
            .init::<TestBackend>(&device)
            .unwrap();
        let bytes = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();

        let metadata = ModelMetadata::new(labels.to_vec(), SIZE as u32, 0.3, 1, 1, 0.5);
        let model_path = save_model_with_metadata(&dir.join("rice_model"), &metadata, &bytes).unwrap();
        let labels_path = dir.join("class_names.json");
        save_class_labels(&labels_path, labels).unwrap();
        (model_path, labels_path)
    }

    #[test]
    fn test_prediction_ranking() {
        let prediction = Prediction {
            probabilities: vec![0.2, 0.5, 0.2, 0.1],
        };
        assert_eq!(prediction.top_index(), Some(1));
        let order: Vec<usize> = prediction.ranked().iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
        assert!((prediction.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_and_predict() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, labels_path) = write_model(dir.path(), &labels(), 3);

        let engine = InferenceEngine::<TestBackend>::load(&model_path, &labels_path, Default::default()).unwrap();
        assert_eq!(engine.class_names(), labels().as_slice());
        assert_eq!(engine.input_dims(), [1, 3, SIZE, SIZE]);
        assert_eq!(engine.output_dims(), [1, 3]);

        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([180, 160, 120])));
        let prediction = engine.predict(&img).unwrap();
        assert_eq!(prediction.probabilities.len(), 3);
        assert!((prediction.sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_label_file_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, labels_path) = write_model(dir.path(), &labels(), 3);
        save_class_labels(&labels_path, &labels()[..2]).unwrap();

        let err = InferenceEngine::<TestBackend>::load(&model_path, &labels_path, Default::default())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::LabelMismatch { labels: 2, outputs: 3 })
        ));
    }

    #[test]
    fn test_output_dim_check_on_fresh_model() {
        let device = Default::default();
        let config = InferenceConfig {
            class_labels: labels(),
            model_input_size: SIZE,
        };
        let model = ModelConfig::new(4).with_image_size(SIZE).init::<TestBackend>(&device).unwrap();
        let engine = InferenceEngine::from_model(model, config, device);

        assert!(matches!(
            engine.verify_output_dim(),
            Err(ClassifierError::LabelMismatch { labels: 3, outputs: 4 })
        ));
    }

    #[test]
    fn test_trace_zero_input() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, labels_path) = write_model(dir.path(), &labels(), 3);
        let engine = InferenceEngine::<TestBackend>::load(&model_path, &labels_path, Default::default()).unwrap();

        let (prediction, trace) = engine.trace_zero_input().unwrap();
        assert_eq!(trace.len(), 8);
        assert_eq!(trace.last().unwrap().shape, vec![1, 3]);
        assert!((prediction.sum() - 1.0).abs() < 1e-5);
    }
}
