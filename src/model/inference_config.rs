//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータとラベルファイルから推論に必要な情報を組み立てます。

use crate::error::ClassifierError;
use crate::model::model_metadata::ModelMetadata;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// クラスラベル（出力インデックス順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub model_input_size: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            model_input_size: metadata.model_input_size as usize,
        }
    }

    /// ラベルファイルの内容がモデルのクラス構成と一致するか検証
    ///
    /// ラベルファイルがモデルと別に配布されるため、件数と順序の両方を確認します。
    pub fn verify_labels(&self, file_labels: &[String]) -> Result<(), ClassifierError> {
        if file_labels.len() != self.class_labels.len() {
            return Err(ClassifierError::LabelMismatch {
                labels: file_labels.len(),
                outputs: self.class_labels.len(),
            });
        }
        if file_labels != self.class_labels.as_slice() {
            return Err(ClassifierError::LabelOrderMismatch {
                file: file_labels.to_vec(),
                model: self.class_labels.clone(),
            });
        }
        Ok(())
    }

    /// クラス数を取得
    pub fn num_total_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("クラス数: {}", self.num_total_classes());
        println!("クラスラベル: {}", self.class_labels.join(", "));
        println!(
            "モデル入力サイズ: {}x{}",
            self.model_input_size, self.model_input_size
        );
        println!("==================");
    }
}
