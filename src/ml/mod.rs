pub mod ml_model;
pub mod preprocess;
pub mod augmentation;
pub mod dataset;
pub mod history;
pub mod evaluation;
pub mod training;
pub mod inference;
pub mod inspect;

pub use ml_model::{LayerActivation, ModelConfig, RiceClassifier, IMAGE_CHANNELS, IMAGE_SIZE, MIN_IMAGE_SIZE};
pub use preprocess::{normalize_image, open_image, ImageTensorData};
pub use augmentation::{AffineParams, Augmenter};
pub use dataset::{RiceBatch, RiceBatcher, RiceDataset, RiceItem};
pub use history::{EpochMetrics, TrainingHistory};
pub use evaluation::{ClassMetrics, ClassificationReport, ConfusionMatrix};
pub use training::{train, train_with_config, BestCheckpoint, EarlyStopping, TrainingOutcome};
pub use inference::{InferenceEngine, Prediction};
pub use inspect::{describe_layers, format_shape, LayerSummary};
