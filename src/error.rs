//! 分類器のドメインエラー

use std::path::PathBuf;

/// 分類器で発生するエラー
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// ラベル数とモデル出力次元が一致しない
    #[error("クラスラベル数 ({labels}) とモデル出力次元 ({outputs}) が一致しません")]
    LabelMismatch { labels: usize, outputs: usize },

    /// ラベルファイルとモデルアーカイブのラベルが一致しない
    #[error("ラベルファイルのクラス {file:?} がモデルのクラス {model:?} と一致しません")]
    LabelOrderMismatch {
        file: Vec<String>,
        model: Vec<String>,
    },

    /// 学習データが見つからない
    #[error("学習データが見つかりません: {0}")]
    EmptyDataset(PathBuf),

    /// 画像の読み込みに失敗
    #[error("画像の読み込みに失敗しました ({path}): {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// 分類対象の画像が未選択
    #[error("画像が読み込まれていません")]
    NoImageLoaded,

    /// 設定値が不正
    #[error("設定が不正です: {0}")]
    InvalidConfig(String),

    /// モデル重みの保存・復元に失敗
    #[error("モデル重みの処理に失敗しました: {0}")]
    Record(String),

    /// アーカイブ内にエントリが存在しない
    #[error("{0} がモデルアーカイブ内に見つかりません")]
    MissingArchiveEntry(&'static str),
}
