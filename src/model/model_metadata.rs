//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（出力インデックス順）
    /// 例: ["Arborio", "Basmati", "Ipsala", "Jasmine", "Karacadag"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（CNNへの入力解像度、通常150x150）
    pub model_input_size: u32,

    /// 学習時のドロップアウト率
    pub dropout: f64,

    /// 指定された学習エポック数
    pub num_epochs: u32,

    /// 実際に学習したエポック数（early stopping で短くなる）
    #[serde(default)]
    pub epochs_run: u32,

    /// 保存時点の検証精度 (0.0 - 1.0)
    #[serde(default)]
    pub best_val_accuracy: f64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        model_input_size: u32,
        dropout: f64,
        num_epochs: u32,
        epochs_run: u32,
        best_val_accuracy: f64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            model_input_size,
            dropout,
            num_epochs,
            epochs_run,
            best_val_accuracy,
            trained_at,
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_label_order() {
        let labels = vec!["Jasmine".to_string(), "Arborio".to_string()];
        let metadata = ModelMetadata::new(labels.clone(), 150, 0.3, 5, 4, 0.91);

        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(restored.class_labels, labels);
        assert_eq!(restored.num_classes(), 2);
        assert_eq!(restored, metadata);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "class_labels": ["A", "B", "C"],
            "model_input_size": 150,
            "dropout": 0.3,
            "num_epochs": 5,
            "trained_at": "2024-01-01T00:00:00+00:00"
        }"#;
        let metadata = ModelMetadata::from_json_string(json).unwrap();
        assert_eq!(metadata.epochs_run, 0);
        assert_eq!(metadata.best_val_accuracy, 0.0);
    }
}
