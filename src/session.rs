//! GUIの分類セッション
//!
//! 読み込み済みの推論エンジンと現在表示中の画像を保持します。

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use burn::tensor::backend::Backend;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::ClassifierError;
use crate::ml::{open_image, InferenceEngine};
use crate::types::{classification_view, default_view, ClassificationView, LoadedImage};

/// プレビュー領域の幅 (px)
pub const PREVIEW_WIDTH: u32 = 400;
/// プレビュー領域の高さ (px)
pub const PREVIEW_HEIGHT: u32 = 350;

/// アスペクト比を保ったまま枠に収まるサイズ
pub fn fit_to_pane(width: u32, height: u32, pane_width: u32, pane_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let scale = (pane_width as f64 / width as f64).min(pane_height as f64 / height as f64);
    (
        ((width as f64 * scale) as u32).max(1),
        ((height as f64 * scale) as u32).max(1),
    )
}

/// 読み込み済みで表示前の画像
///
/// デコードとプレビュー生成はUIスレッド外で行います。
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub path: PathBuf,
    pub image: DynamicImage,
    pub preview: String,
    pub preview_size: (u32, u32),
}

impl PendingImage {
    pub fn load(path: &Path) -> Result<Self> {
        let image = open_image(path)?;
        let (w, h) = fit_to_pane(image.width(), image.height(), PREVIEW_WIDTH, PREVIEW_HEIGHT);
        let scaled = image.resize_exact(w, h, FilterType::Lanczos3);

        let mut png = Vec::new();
        scaled
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("プレビュー画像のエンコードに失敗しました")?;

        Ok(Self {
            path: path.to_path_buf(),
            image,
            preview: format!("data:image/png;base64,{}", STANDARD.encode(&png)),
            preview_size: (w, h),
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// 分類セッション
pub struct ClassificationSession<B: Backend> {
    engine: InferenceEngine<B>,
    current: Option<PendingImage>,
}

impl<B: Backend> ClassificationSession<B> {
    pub fn new(engine: InferenceEngine<B>) -> Self {
        Self {
            engine,
            current: None,
        }
    }

    pub fn class_names(&self) -> &[String] {
        self.engine.class_names()
    }

    pub fn has_image(&self) -> bool {
        self.current.is_some()
    }

    pub fn default_view(&self) -> ClassificationView {
        default_view(self.class_names())
    }

    /// 画像を現在の分類対象にする（結果表示は初期化）
    pub fn set_image(&mut self, pending: PendingImage) -> LoadedImage {
        let loaded = LoadedImage {
            file_name: pending.file_name(),
            preview: pending.preview.clone(),
            preview_width: pending.preview_size.0,
            preview_height: pending.preview_size.1,
            view: self.default_view(),
        };
        log::info!("画像を読み込みました: {}", pending.path.display());
        self.current = Some(pending);
        loaded
    }

    /// 現在の画像を分類
    pub fn classify(&self) -> Result<ClassificationView> {
        let current = self.current.as_ref().ok_or(ClassifierError::NoImageLoaded)?;
        let prediction = self.engine.predict(&current.image)?;
        let view = classification_view(self.class_names(), &prediction);
        log::info!("{} -> {}", current.path.display(), view.result_text);
        Ok(view)
    }
}
