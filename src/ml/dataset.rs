//! 学習データセットとバッチャー
//!
//! データディレクトリはクラスごとのサブフォルダで構成されます。
//! 画像はパスのみ保持し、バッチ作成時に読み込みます。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor},
};
use rand::{rngs::StdRng, SeedableRng};

use crate::error::ClassifierError;
use crate::ml::augmentation::Augmenter;
use crate::ml::ml_model::IMAGE_CHANNELS;
use crate::ml::preprocess::{open_image, rgb_to_chw, to_rgb_resized};

/// 学習対象とみなす拡張子
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiceItem {
    pub path: PathBuf,
    pub label: usize,
}

/// 米粒画像データセット
#[derive(Clone, Debug)]
pub struct RiceDataset {
    samples: Vec<RiceItem>,
    class_names: Vec<String>,
}

impl RiceDataset {
    /// ディレクトリから読み込む
    ///
    /// サブフォルダ名をクラス名とし、アルファベット順にクラスIDを割り当てます。
    pub fn from_directory(data_dir: &Path) -> anyhow::Result<Self> {
        if !data_dir.is_dir() {
            return Err(ClassifierError::EmptyDataset(data_dir.to_path_buf()).into());
        }

        let mut class_dirs: Vec<PathBuf> = std::fs::read_dir(data_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        class_dirs.sort();

        let mut samples = Vec::new();
        let mut class_names = Vec::with_capacity(class_dirs.len());

        for class_dir in class_dirs {
            let Some(class_name) = class_dir.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };

            let mut files: Vec<PathBuf> = std::fs::read_dir(&class_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            files.sort();

            if files.is_empty() {
                log::warn!("クラス '{}' に画像がありません", class_name);
            }

            let label = class_names.len();
            class_names.push(class_name);
            samples.extend(files.into_iter().map(|path| RiceItem { path, label }));
        }

        if class_names.is_empty() || samples.is_empty() {
            return Err(ClassifierError::EmptyDataset(data_dir.to_path_buf()).into());
        }

        Ok(Self {
            samples,
            class_names,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn items(&self) -> &[RiceItem] {
        &self.samples
    }

    /// クラスごとのサンプル数
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for item in &self.samples {
            counts[item.label] += 1;
        }
        counts
    }

    /// 学習用と検証用に分割
    ///
    /// クラスごとに先頭 `floor(n * validation_fraction)` 枚を検証用とします。
    pub fn split(self, validation_fraction: f32) -> (Self, Self) {
        let mut train = Vec::new();
        let mut valid = Vec::new();

        for label in 0..self.class_names.len() {
            let class_items: Vec<&RiceItem> =
                self.samples.iter().filter(|item| item.label == label).collect();
            let n_valid = (class_items.len() as f32 * validation_fraction).floor() as usize;

            for (i, item) in class_items.into_iter().enumerate() {
                if i < n_valid {
                    valid.push(item.clone());
                } else {
                    train.push(item.clone());
                }
            }
        }

        (
            Self {
                samples: train,
                class_names: self.class_names.clone(),
            },
            Self {
                samples: valid,
                class_names: self.class_names,
            },
        )
    }

    /// データセット統計を表示
    pub fn log_statistics(&self, title: &str) {
        log::info!("{}: {} 枚 / {} クラス", title, self.samples.len(), self.num_classes());
        for (name, count) in self.class_names.iter().zip(self.class_counts()) {
            log::info!("  {}: {} 枚", name, count);
        }
    }
}

impl Dataset<RiceItem> for RiceDataset {
    fn get(&self, index: usize) -> Option<RiceItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct RiceBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// データ拡張を有効にした場合は学習用、無効の場合は検証用として使います。
pub struct RiceBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    augmentation: Option<(Augmenter, Mutex<StdRng>)>,
}

impl<B: Backend> RiceBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self {
            device,
            image_size,
            augmentation: None,
        }
    }

    /// データ拡張付きのバッチャー
    pub fn with_augmentation(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.augmentation = Some((augmenter, Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    fn load_pixels(&self, path: &Path) -> Result<Vec<f32>, ClassifierError> {
        let img = open_image(path)?;
        let rgb = to_rgb_resized(&img, self.image_size);
        let rgb = match &self.augmentation {
            Some((augmenter, rng)) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                augmenter.augment(&rgb, &mut *rng)
            }
            None => rgb,
        };
        Ok(rgb_to_chw(&rgb))
    }
}

/// 読めない画像が1枚でもあればバッチ全体をエラーにする
impl<B: Backend> Batcher<B, RiceItem, Result<RiceBatch<B>, ClassifierError>> for RiceBatcher<B> {
    fn batch(&self, items: Vec<RiceItem>, _device: &B::Device) -> Result<RiceBatch<B>, ClassifierError> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * IMAGE_CHANNELS * size * size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            let pixels = self.load_pixels(&item.path).inspect_err(|e| log::error!("{}", e))?;
            all_pixels.extend_from_slice(&pixels);
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, IMAGE_CHANNELS, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &self.device);

        Ok(RiceBatch { images, targets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn write_dataset(root: &Path, classes: &[(&str, usize)]) {
        for (name, count) in classes {
            let dir = root.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                RgbImage::from_pixel(12, 8, Rgb([i as u8 * 20, 100, 200]))
                    .save(dir.join(format!("{name}_{i:03}.png")))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_from_directory_sorts_classes_and_files() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("Jasmine", 2), ("Arborio", 3)]);
        std::fs::write(dir.path().join("Arborio").join("notes.txt"), "skip").unwrap();
        std::fs::write(dir.path().join("README.md"), "skip").unwrap();

        let dataset = RiceDataset::from_directory(dir.path()).unwrap();
        assert_eq!(dataset.class_names(), ["Arborio", "Jasmine"]);
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.class_counts(), vec![3, 2]);

        let first = dataset.get(0).unwrap();
        assert_eq!(first.label, 0);
        assert!(first.path.ends_with("Arborio_000.png"));
    }

    #[test]
    fn test_extensions_are_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let class_dir = dir.path().join("Ipsala");
        std::fs::create_dir_all(&class_dir).unwrap();
        RgbImage::new(4, 4).save(class_dir.join("a.png")).unwrap();
        std::fs::copy(class_dir.join("a.png"), class_dir.join("b.PNG")).unwrap();

        let dataset = RiceDataset::from_directory(dir.path()).unwrap();
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Basmati")).unwrap();
        assert!(RiceDataset::from_directory(dir.path()).is_err());
        assert!(RiceDataset::from_directory(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_split_is_per_class() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("Arborio", 10), ("Basmati", 7)]);

        let dataset = RiceDataset::from_directory(dir.path()).unwrap();
        let (train, valid) = dataset.split(0.2);

        assert_eq!(valid.class_counts(), vec![2, 1]);
        assert_eq!(train.class_counts(), vec![8, 6]);
        assert_eq!(train.class_names(), valid.class_names());
        assert!(valid.items()[0].path.ends_with("Arborio_000.png"));
        assert!(valid.items()[1].path.ends_with("Arborio_001.png"));
    }

    #[test]
    fn test_batcher_builds_nchw_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("Arborio", 2), ("Karacadag", 1)]);
        let dataset = RiceDataset::from_directory(dir.path()).unwrap();

        let device = Default::default();
        let batcher = RiceBatcher::<TestBackend>::new(device, 16);
        let batch = batcher.batch(dataset.items().to_vec(), &device).unwrap();

        assert_eq!(batch.images.dims(), [3, 3, 16, 16]);
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 0, 1]);
    }

    #[test]
    fn test_batcher_rejects_unreadable_images() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("Arborio", 1)]);
        let broken = dir.path().join("Arborio").join("broken.png");
        std::fs::write(&broken, b"nope").unwrap();
        let dataset = RiceDataset::from_directory(dir.path()).unwrap();
        assert_eq!(dataset.len(), 2);

        let device = Default::default();
        let batcher = RiceBatcher::<TestBackend>::new(device, 10);
        let result = batcher.batch(dataset.items().to_vec(), &device);

        match result {
            Err(ClassifierError::ImageDecode { path, .. }) => assert_eq!(path, broken),
            other => panic!("unexpected result: {:?}", other.map(|b| b.images.dims())),
        }
    }

    #[test]
    fn test_augmented_batcher_keeps_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &[("Arborio", 2)]);
        let dataset = RiceDataset::from_directory(dir.path()).unwrap();

        let device = Default::default();
        let batcher = RiceBatcher::<TestBackend>::new(device, 12)
            .with_augmentation(Augmenter::new(Default::default()), 42);
        let batch = batcher.batch(dataset.items().to_vec(), &device).unwrap();
        assert_eq!(batch.images.dims(), [2, 3, 12, 12]);
    }
}
