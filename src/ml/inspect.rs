//! モデル構造の要約
//!
//! レイヤーごとの入出力形状とパラメータ数を設定から計算します。

use crate::ml::ml_model::{
    ModelConfig, CONV1_FILTERS, CONV2_FILTERS, HIDDEN_UNITS, IMAGE_CHANNELS, KERNEL_SIZE,
};

/// 1レイヤー分の要約
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: &'static str,
    pub kind: &'static str,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub params: usize,
}

/// 形状を `[1, 3, 150, 150]` 形式で表示
pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

fn conv_params(in_channels: usize, out_channels: usize) -> usize {
    KERNEL_SIZE * KERNEL_SIZE * in_channels * out_channels + out_channels
}

fn dense_params(inputs: usize, outputs: usize) -> usize {
    inputs * outputs + outputs
}

/// 設定からレイヤー構成を組み立てる
pub fn describe_layers(config: &ModelConfig, batch_size: usize) -> Vec<LayerSummary> {
    let s = config.image_size;
    let c1 = config.conv1_size();
    let p1 = config.pool1_size();
    let c2 = config.conv2_size();
    let p2 = config.feature_map_size();
    let flat = config.flatten_dim();
    let n = config.num_classes;
    let b = batch_size;

    let layer = |name, kind, input_shape: Vec<usize>, output_shape: Vec<usize>, params| LayerSummary {
        name,
        kind,
        input_shape,
        output_shape,
        params,
    };

    vec![
        layer(
            "conv2d",
            "Conv2d + ReLU",
            vec![b, IMAGE_CHANNELS, s, s],
            vec![b, CONV1_FILTERS, c1, c1],
            conv_params(IMAGE_CHANNELS, CONV1_FILTERS),
        ),
        layer(
            "max_pooling2d",
            "MaxPool2d",
            vec![b, CONV1_FILTERS, c1, c1],
            vec![b, CONV1_FILTERS, p1, p1],
            0,
        ),
        layer(
            "conv2d_1",
            "Conv2d + ReLU",
            vec![b, CONV1_FILTERS, p1, p1],
            vec![b, CONV2_FILTERS, c2, c2],
            conv_params(CONV1_FILTERS, CONV2_FILTERS),
        ),
        layer(
            "max_pooling2d_1",
            "MaxPool2d",
            vec![b, CONV2_FILTERS, c2, c2],
            vec![b, CONV2_FILTERS, p2, p2],
            0,
        ),
        layer(
            "flatten",
            "Flatten",
            vec![b, CONV2_FILTERS, p2, p2],
            vec![b, flat],
            0,
        ),
        layer(
            "dense",
            "Linear + ReLU",
            vec![b, flat],
            vec![b, HIDDEN_UNITS],
            dense_params(flat, HIDDEN_UNITS),
        ),
        layer("dropout", "Dropout", vec![b, HIDDEN_UNITS], vec![b, HIDDEN_UNITS], 0),
        layer(
            "dense_1",
            "Linear + Softmax",
            vec![b, HIDDEN_UNITS],
            vec![b, n],
            dense_params(HIDDEN_UNITS, n),
        ),
    ]
}

/// 総パラメータ数
pub fn total_params(layers: &[LayerSummary]) -> usize {
    layers.iter().map(|l| l.params).sum()
}

/// レイヤー表を文字列化
pub fn summary_table(layers: &[LayerSummary]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<18} {:<18} {:<22} {:>10}\n",
        "Layer", "Type", "Output Shape", "Params"
    ));
    out.push_str(&format!("{}\n", "=".repeat(71)));
    for l in layers {
        out.push_str(&format!(
            "{:<18} {:<18} {:<22} {:>10}\n",
            l.name,
            l.kind,
            format_shape(&l.output_shape),
            l.params
        ));
    }
    out.push_str(&format!("{}\n", "=".repeat(71)));
    out.push_str(&format!("Total params: {}\n", total_params(layers)));
    out
}

/// レイヤー表を表示
pub fn print_summary(config: &ModelConfig) {
    println!("\n=== モデル構成 ===");
    print!("{}", summary_table(&describe_layers(config, 1)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::Module;

    #[test]
    fn test_default_param_counts() {
        let layers = describe_layers(&ModelConfig::new(5), 1);
        assert_eq!(layers[0].params, 448);
        assert_eq!(layers[2].params, 4640);
        assert_eq!(layers[5].params, 32 * 36 * 36 * 64 + 64);
        assert_eq!(layers[7].params, 64 * 5 + 5);
        assert_eq!(layers[0].input_shape, vec![1, 3, 150, 150]);
        assert_eq!(layers[7].output_shape, vec![1, 5]);
    }

    #[test]
    fn test_param_total_matches_model() {
        let config = ModelConfig::new(3).with_image_size(32);
        let model = config.init::<NdArray<f32>>(&Default::default()).unwrap();
        assert_eq!(total_params(&describe_layers(&config, 1)), model.num_params());
    }

    #[test]
    fn test_shapes_chain() {
        let layers = describe_layers(&ModelConfig::new(4).with_image_size(40), 2);
        for pair in layers.windows(2) {
            assert_eq!(pair[0].output_shape, pair[1].input_shape);
        }
        assert_eq!(format_shape(&layers[4].output_shape), "[2, 2048]");
    }

    #[test]
    fn test_summary_table_lists_layers() {
        let table = summary_table(&describe_layers(&ModelConfig::new(5), 1));
        assert!(table.contains("max_pooling2d_1"));
        assert!(table.contains("Total params"));
    }
}
