//! 検証データに対する評価指標
//!
//! 混同行列とクラスごとの適合率・再現率・F1スコアを計算します。

use serde::{Deserialize, Serialize};

/// 混同行列 (行: 正解, 列: 予測)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    class_names: Vec<String>,
    matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(class_names: &[String]) -> Self {
        let n = class_names.len();
        Self {
            class_names: class_names.to_vec(),
            matrix: vec![vec![0; n]; n],
        }
    }

    /// 予測結果を1件記録
    pub fn record(&mut self, actual: usize, predicted: usize) {
        self.matrix[actual][predicted] += 1;
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix[actual][predicted]
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.matrix[i][i]).sum()
    }

    /// 最大セル値（ヒートマップの色スケール用）
    pub fn max_count(&self) -> usize {
        self.matrix.iter().flatten().copied().max().unwrap_or(0)
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .class_names
            .iter()
            .map(|n| n.len())
            .max()
            .unwrap_or(0)
            .max(6);

        writeln!(f, "Confusion Matrix (行: 正解 / 列: 予測)")?;
        write!(f, "{:>width$} |", "", width = width)?;
        for name in &self.class_names {
            write!(f, " {:>width$}", name, width = width)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", "-".repeat((width + 1) * (self.num_classes() + 1) + 1))?;
        for (name, row) in self.class_names.iter().zip(&self.matrix) {
            write!(f, "{:>width$} |", name, width = width)?;
            for count in row {
                write!(f, " {:>width$}", count, width = width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// 1クラス分の評価指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl ClassMetrics {
    fn from_confusion_matrix(matrix: &ConfusionMatrix, class_idx: usize) -> Self {
        let n = matrix.num_classes();
        let tp = matrix.get(class_idx, class_idx) as f64;
        let predicted: usize = (0..n).map(|i| matrix.get(i, class_idx)).sum();
        let support: usize = (0..n).map(|j| matrix.get(class_idx, j)).sum();

        let precision = safe_div(tp, predicted as f64);
        let recall = safe_div(tp, support as f64);
        let f1 = safe_div(2.0 * precision * recall, precision + recall);

        Self {
            name: matrix.class_names()[class_idx].clone(),
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// 平均値 (macro / weighted)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// 分類レポート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub total_support: usize,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(matrix: &ConfusionMatrix) -> Self {
        let per_class: Vec<ClassMetrics> = (0..matrix.num_classes())
            .map(|i| ClassMetrics::from_confusion_matrix(matrix, i))
            .collect();

        let total_support = matrix.total();
        let n = per_class.len() as f64;

        let macro_avg = AveragedMetrics {
            precision: safe_div(per_class.iter().map(|m| m.precision).sum(), n),
            recall: safe_div(per_class.iter().map(|m| m.recall).sum(), n),
            f1: safe_div(per_class.iter().map(|m| m.f1).sum(), n),
        };

        let weighted = |value: fn(&ClassMetrics) -> f64| {
            safe_div(
                per_class.iter().map(|m| value(m) * m.support as f64).sum(),
                total_support as f64,
            )
        };
        let weighted_avg = AveragedMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
        };

        Self {
            accuracy: safe_div(matrix.correct() as f64, total_support as f64),
            per_class,
            macro_avg,
            weighted_avg,
            total_support,
        }
    }

    /// 重み付きF1スコア
    pub fn weighted_f1(&self) -> f64 {
        self.weighted_avg.f1
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .per_class
            .iter()
            .map(|m| m.name.len())
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support",
            width = width
        )?;
        writeln!(f)?;
        for m in &self.per_class {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.name, m.precision, m.recall, m.f1, m.support,
                width = width
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total_support,
            width = width
        )?;
        for (label, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                label, avg.precision, avg.recall, avg.f1, self.total_support,
                width = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names() -> Vec<String> {
        vec!["Arborio".into(), "Basmati".into(), "Ipsala".into()]
    }

    fn sample_matrix() -> ConfusionMatrix {
        // 正解: A A A B B C / 予測: A A B B C C
        let mut m = ConfusionMatrix::new(&names());
        for (actual, predicted) in [(0, 0), (0, 0), (0, 1), (1, 1), (1, 2), (2, 2)] {
            m.record(actual, predicted);
        }
        m
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let m = sample_matrix();
        assert_eq!(m.get(0, 0), 2);
        assert_eq!(m.get(0, 1), 1);
        assert_eq!(m.get(1, 2), 1);
        assert_eq!(m.total(), 6);
        assert_eq!(m.correct(), 4);
        assert_eq!(m.max_count(), 2);
    }

    #[test]
    fn test_per_class_metrics() {
        let report = ClassificationReport::from_confusion_matrix(&sample_matrix());

        let a = &report.per_class[0];
        assert_relative_eq!(a.precision, 1.0);
        assert_relative_eq!(a.recall, 2.0 / 3.0);
        assert_relative_eq!(a.f1, 0.8);
        assert_eq!(a.support, 3);

        let b = &report.per_class[1];
        assert_relative_eq!(b.precision, 0.5);
        assert_relative_eq!(b.recall, 0.5);

        let c = &report.per_class[2];
        assert_relative_eq!(c.precision, 0.5);
        assert_relative_eq!(c.recall, 1.0);
        assert_relative_eq!(c.f1, 2.0 / 3.0);

        assert_relative_eq!(report.accuracy, 4.0 / 6.0);
    }

    #[test]
    fn test_averages() {
        let report = ClassificationReport::from_confusion_matrix(&sample_matrix());

        let macro_f1 = (0.8 + 0.5 + 2.0 / 3.0) / 3.0;
        assert_relative_eq!(report.macro_avg.f1, macro_f1, epsilon = 1e-12);

        let weighted_f1 = (0.8 * 3.0 + 0.5 * 2.0 + 2.0 / 3.0) / 6.0;
        assert_relative_eq!(report.weighted_f1(), weighted_f1, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_division_yields_zero() {
        let mut m = ConfusionMatrix::new(&names());
        m.record(0, 0);
        let report = ClassificationReport::from_confusion_matrix(&m);
        assert_eq!(report.per_class[1].precision, 0.0);
        assert_eq!(report.per_class[1].f1, 0.0);
        assert_eq!(report.per_class[2].support, 0);
    }

    #[test]
    fn test_report_display_lists_every_class() {
        let text = ClassificationReport::from_confusion_matrix(&sample_matrix()).to_string();
        for name in names() {
            assert!(text.contains(&name));
        }
        assert!(text.contains("macro avg"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("accuracy"));
    }
}
