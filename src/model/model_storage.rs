//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//! クラス名一覧は推論時に単独で読めるよう、別のJSONファイルにも保存します。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::error::ClassifierError;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを .tar.gz に正規化
///
/// 書き込みと読み込みの両方で同じ規則を使います。
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }
    }
    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存したファイルのパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);
    create_parent_dir(&tar_gz_path)?;

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで確実に閉じる
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?;
    encoder.finish().context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

fn open_archive(model_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_path = archive_path(model_path);
    let tar_gz_file = File::open(&tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(model_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(model_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(ClassifierError::MissingArchiveEntry(METADATA_ENTRY).into())
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(model_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(model_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(ClassifierError::MissingArchiveEntry(METADATA_ENTRY).into()),
        (_, None) => Err(ClassifierError::MissingArchiveEntry(MODEL_ENTRY).into()),
    }
}

/// クラス名一覧をJSON配列として保存
pub fn save_class_labels(path: &Path, labels: &[String]) -> Result<()> {
    create_parent_dir(path)?;
    let json = serde_json::to_string_pretty(labels).context("Failed to serialize class labels")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write class labels: {:?}", path))
}

/// クラス名一覧を読み込む
pub fn load_class_labels(path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read class labels: {:?}", path))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid class label file: {:?}", path))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス数: {}", metadata.num_classes());
    println!("クラスラベル: {}", metadata.class_labels.join(", "));
    println!(
        "モデル入力サイズ: {}x{}",
        metadata.model_input_size, metadata.model_input_size
    );
    println!("ドロップアウト率: {}", metadata.dropout);
    println!(
        "学習エポック数: {} / {}",
        metadata.epochs_run, metadata.num_epochs
    );
    println!("検証精度: {:.2}%", metadata.best_val_accuracy * 100.0);
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
