//! 機械学習モデルの共通定義
//!
//! 米粒画像分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

use crate::error::ClassifierError;

/// 画像サイズ
pub const IMAGE_SIZE: usize = 150;

/// 2段の畳み込み + プーリング後に特徴マップが残る最小入力サイズ
pub const MIN_IMAGE_SIZE: usize = 10;

/// 入力チャネル数 (RGB)
pub const IMAGE_CHANNELS: usize = 3;

pub(crate) const CONV1_FILTERS: usize = 16;
pub(crate) const CONV2_FILTERS: usize = 32;
pub(crate) const HIDDEN_UNITS: usize = 64;
pub(crate) const KERNEL_SIZE: usize = 3;
pub(crate) const POOL_SIZE: usize = 2;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.3)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 150)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 1段目の畳み込み後のサイズ (padding無し3x3)
    pub fn conv1_size(&self) -> usize {
        self.image_size.saturating_sub(KERNEL_SIZE - 1)
    }

    /// 1段目のプーリング後のサイズ
    pub fn pool1_size(&self) -> usize {
        self.conv1_size() / POOL_SIZE
    }

    /// 2段目の畳み込み後のサイズ
    pub fn conv2_size(&self) -> usize {
        self.pool1_size().saturating_sub(KERNEL_SIZE - 1)
    }

    /// 2段目のプーリング後のサイズ（Flatten直前）
    pub fn feature_map_size(&self) -> usize {
        self.conv2_size() / POOL_SIZE
    }

    /// Flatten後の特徴次元
    pub fn flatten_dim(&self) -> usize {
        CONV2_FILTERS * self.feature_map_size() * self.feature_map_size()
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<RiceClassifier<B>, ClassifierError> {
        if self.image_size < MIN_IMAGE_SIZE || self.feature_map_size() == 0 {
            return Err(ClassifierError::InvalidConfig(format!(
                "入力サイズが小さすぎます: {} (最小{}x{}が必要)",
                self.image_size, MIN_IMAGE_SIZE, MIN_IMAGE_SIZE
            )));
        }
        if self.num_classes < 2 {
            return Err(ClassifierError::InvalidConfig(format!(
                "クラス数は2以上である必要があります: {}",
                self.num_classes
            )));
        }

        log::debug!(
            "[Model] 入力 {s}x{s} -> Conv1 {c1}x{c1} -> Pool1 {p1}x{p1} -> Conv2 {c2}x{c2} -> Pool2 {f}x{f} -> Flatten {d}",
            s = self.image_size,
            c1 = self.conv1_size(),
            p1 = self.pool1_size(),
            c2 = self.conv2_size(),
            f = self.feature_map_size(),
            d = self.flatten_dim(),
        );

        Ok(RiceClassifier {
            conv1: Conv2dConfig::new([IMAGE_CHANNELS, CONV1_FILTERS], [KERNEL_SIZE, KERNEL_SIZE])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            conv2: Conv2dConfig::new([CONV1_FILTERS, CONV2_FILTERS], [KERNEL_SIZE, KERNEL_SIZE])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            fc1: LinearConfig::new(self.flatten_dim(), HIDDEN_UNITS).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(HIDDEN_UNITS, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 米粒分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 3x3 (3 -> 16) + ReLU + MaxPool 2x2
/// - Conv 3x3 (16 -> 32) + ReLU + MaxPool 2x2
/// - Flatten
/// - FC: d -> 64 + ReLU + Dropout
/// - FC: 64 -> num_classes
/// - Softmax (予測時)
#[derive(Module, Debug)]
pub struct RiceClassifier<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,

    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,

    activation: Relu,
}

/// レイヤーごとの出力形状（診断用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerActivation {
    pub name: &'static str,
    pub shape: Vec<usize>,
}

impl<B: Backend> RiceClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// クラス確率を計算 (softmax)
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 各レイヤーの出力形状を記録しながら順伝播（確率を返す）
    pub fn forward_traced(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Vec<LayerActivation>) {
        let mut trace = Vec::new();
        let mut record = |name: &'static str, shape: &[usize]| {
            trace.push(LayerActivation {
                name,
                shape: shape.to_vec(),
            });
        };

        let [batch_size, _, _, _] = images.dims();

        let x = self.activation.forward(self.conv1.forward(images));
        record("conv2d", &x.dims());
        let x = self.pool1.forward(x);
        record("max_pooling2d", &x.dims());

        let x = self.activation.forward(self.conv2.forward(x));
        record("conv2d_1", &x.dims());
        let x = self.pool2.forward(x);
        record("max_pooling2d_1", &x.dims());

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);
        record("flatten", &x.dims());

        let x = self.activation.forward(self.fc1.forward(x));
        record("dense", &x.dims());
        let x = self.dropout.forward(x);
        record("dropout", &x.dims());

        let x = softmax(self.fc2.forward(x), 1);
        record("dense_1", &x.dims());

        (x, trace)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - `targets`: ターゲットラベル [batch_size]
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
