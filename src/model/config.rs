//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデルファイルの場所、学習・データ拡張のパラメータを
//! JSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ClassifierError;
use crate::ml::{IMAGE_SIZE, MIN_IMAGE_SIZE};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Ok(DeviceType::Wgpu),
            "cpu" | "ndarray" => Ok(DeviceType::Cpu),
            other => Err(ClassifierError::InvalidConfig(format!(
                "不明なデバイス種別: {}",
                other
            ))),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルアーカイブ (.tar.gz) のパス
    pub model_path: String,
    /// クラス名一覧 (JSON) のパス
    pub labels_path: String,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/rice_model.tar.gz".to_string(),
            labels_path: "models/class_names.json".to_string(),
            image_size: IMAGE_SIZE,
            dropout: 0.3,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// クラスごとのサブフォルダを持つ学習データディレクトリ
    pub data_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_split: f32,
    /// 検証損失が改善しないまま許容するエポック数
    pub early_stopping_patience: usize,
    /// グラフ・学習履歴の出力先
    pub report_dir: String,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: "Rice_Image_Dataset".to_string(),
            num_epochs: 5,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.2,
            early_stopping_patience: 3,
            report_dir: "reports".to_string(),
        }
    }
}

/// データ拡張設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AugmentationSettings {
    /// 回転角の範囲（度、±）
    pub rotation_range: f32,
    /// 横方向シフト（画像幅に対する割合、±）
    pub width_shift_range: f32,
    /// 縦方向シフト（画像高さに対する割合、±）
    pub height_shift_range: f32,
    /// せん断角の範囲（度、±）
    pub shear_range: f32,
    /// ズーム範囲 ([1 - zoom, 1 + zoom])
    pub zoom_range: f32,
    /// 左右反転を行うか
    pub horizontal_flip: bool,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            shear_range: 0.1,
            zoom_range: 0.1,
            horizontal_flip: true,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 学習に使う計算デバイス
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// データ拡張設定
    #[serde(default)]
    pub augmentation: AugmentationSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 指定パスから設定を読み込む、失敗した場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                log::info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の範囲を検証
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let invalid = |msg: String| Err(ClassifierError::InvalidConfig(msg));

        if self.model.image_size < MIN_IMAGE_SIZE {
            return invalid(format!(
                "入力サイズが小さすぎます: {} (最小{}x{}が必要)",
                self.model.image_size, MIN_IMAGE_SIZE, MIN_IMAGE_SIZE
            ));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return invalid(format!("ドロップアウト率が範囲外です: {}", self.model.dropout));
        }
        if self.training.num_epochs == 0 {
            return invalid("エポック数は1以上である必要があります".to_string());
        }
        if self.training.batch_size == 0 {
            return invalid("バッチサイズは1以上である必要があります".to_string());
        }
        if !(0.0..1.0).contains(&self.training.validation_split) {
            return invalid(format!(
                "検証データの割合が範囲外です: {}",
                self.training.validation_split
            ));
        }
        if self.training.learning_rate <= 0.0 {
            return invalid(format!("学習率が不正です: {}", self.training.learning_rate));
        }
        if !(0.0..1.0).contains(&self.augmentation.zoom_range) {
            return invalid(format!(
                "ズーム範囲が不正です: {}",
                self.augmentation.zoom_range
            ));
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("モデルパス: {}", self.model.model_path);
        println!("ラベルパス: {}", self.model.labels_path);
        println!("入力サイズ: {}x{}", self.model.image_size, self.model.image_size);
        println!("ドロップアウト率: {}", self.model.dropout);
        println!("\n--- トレーニング設定 ---");
        println!("データディレクトリ: {}", self.training.data_dir);
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("シード: {}", self.training.seed);
        println!("検証データ割合: {}", self.training.validation_split);
        println!("Early stopping: {} エポック", self.training.early_stopping_patience);
        println!("\n--- データ拡張 ---");
        println!("回転: ±{}°", self.augmentation.rotation_range);
        println!(
            "シフト: ±{} / ±{}",
            self.augmentation.width_shift_range, self.augmentation.height_shift_range
        );
        println!("せん断: {}", self.augmentation.shear_range);
        println!("ズーム: {}", self.augmentation.zoom_range);
        println!("左右反転: {}", self.augmentation.horizontal_flip);
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.model.image_size, 150);
        assert_eq!(config.training.num_epochs, 5);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.early_stopping_patience, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.model_path, deserialized.model.model_path);
        assert_eq!(config.augmentation, deserialized.augmentation);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{ "device_type": "Cpu" }"#).unwrap();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.training.validation_split, 0.2);
        assert!(config.augmentation.horizontal_flip);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }

    #[test]
    fn test_device_type_from_str() {
        assert_eq!("cpu".parse::<DeviceType>().unwrap(), DeviceType::Cpu);
        assert_eq!("WGPU".parse::<DeviceType>().unwrap(), DeviceType::Wgpu);
        assert!("tpu".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.model.image_size = 8;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.training.validation_split = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_falls_back_on_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_or_default_from(&path);
        assert_eq!(config.training.num_epochs, 5);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.training.num_epochs = 12;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 12);
    }
}
