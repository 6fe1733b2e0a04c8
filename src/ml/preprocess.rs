//! 推論・学習共通の画像前処理
//!
//! リサイズ → RGB 3チャネル化 → [0, 1] 正規化 → バッチ次元の付与を行います。
//! 出力は burn の NCHW レイアウトです。

use image::{imageops::FilterType, DynamicImage, ImageError, ImageReader, RgbImage};
use std::path::Path;

use crate::error::ClassifierError;
use crate::ml::ml_model::IMAGE_CHANNELS;

/// 前処理済みの画像データ
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensorData {
    /// CHW順で平坦化した画素値
    pub data: Vec<f32>,
    /// [1, 3, size, size]
    pub shape: [usize; 4],
}

/// 画像を指定サイズのRGBに変換
///
/// グレースケールは3チャネルに複製、アルファチャネルは破棄されます。
pub fn to_rgb_resized(img: &DynamicImage, image_size: usize) -> RgbImage {
    let size = image_size as u32;
    let rgb = img.to_rgb8();
    if rgb.dimensions() == (size, size) {
        rgb
    } else {
        image::imageops::resize(&rgb, size, size, FilterType::Triangle)
    }
}

/// RGB画像を [0, 1] に正規化し CHW 順で平坦化
pub fn rgb_to_chw(rgb: &RgbImage) -> Vec<f32> {
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; IMAGE_CHANNELS * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        for channel in 0..IMAGE_CHANNELS {
            data[channel * plane + i] = pixel[channel] as f32 / 255.0;
        }
    }

    data
}

/// モデル入力形式へ変換
pub fn normalize_image(img: &DynamicImage, image_size: usize) -> ImageTensorData {
    let rgb = to_rgb_resized(img, image_size);
    ImageTensorData {
        data: rgb_to_chw(&rgb),
        shape: [1, IMAGE_CHANNELS, image_size, image_size],
    }
}

/// 画像ファイルを読み込む
///
/// 形式は拡張子ではなくファイルの中身から判定します。
pub fn open_image(path: &Path) -> Result<DynamicImage, ClassifierError> {
    let decode = || -> Result<DynamicImage, ImageError> {
        Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
    };
    decode().map_err(|source| ClassifierError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })
}
