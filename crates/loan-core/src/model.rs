use crate::error::PredictError;
use crate::util::{clamp01, sigmoid};
use serde::{Deserialize, Serialize};

/// Binary classifier over a fully prepared feature row.
///
/// Implementations must be deterministic: same row, same output.
pub trait Classifier: Send + Sync {
    /// Returns (class label 0|1, probability of class 1).
    fn predict(&self, row: &[f64]) -> Result<(u8, f64), PredictError>;

    fn n_features(&self) -> usize;

    fn name(&self) -> &'static str;
}

#[inline]
fn check_width(row: &[f64], expected: usize) -> Result<(), PredictError> {
    if row.len() != expected {
        return Err(PredictError::ModelInput {
            expected,
            got: row.len(),
        });
    }
    Ok(())
}

#[inline]
fn label_of(p1: f64) -> u8 {
    // argmax over (1 - p1, p1); ties go to class 0
    if p1 > 0.5 { 1 } else { 0 }
}

/// One fitted decision tree as flat node arrays.
///
/// A node is a leaf when `left[i] < 0`; otherwise go to `left[i]` if
/// `row[feature[i]] <= threshold[i]`, else to `right[i]`. Leaves carry the
/// fraction of class-1 training samples in `p1[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub left: Vec<i32>,
    pub right: Vec<i32>,
    pub feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub p1: Vec<f64>,
}

impl Tree {
    fn validate(&self, n_features: usize) -> anyhow::Result<()> {
        let n = self.left.len();
        anyhow::ensure!(n > 0, "empty tree");
        anyhow::ensure!(
            self.right.len() == n
                && self.feature.len() == n
                && self.threshold.len() == n
                && self.p1.len() == n,
            "tree node arrays have different lengths"
        );
        for i in 0..n {
            let (l, r) = (self.left[i], self.right[i]);
            if l < 0 {
                let p = self.p1[i];
                anyhow::ensure!(
                    p.is_finite() && (0.0..=1.0).contains(&p),
                    "leaf {i} has probability {p} outside [0, 1]"
                );
                continue;
            }
            // children strictly after the parent, so traversal always terminates
            anyhow::ensure!(
                (l as usize) > i && (l as usize) < n && r > 0 && (r as usize) > i && (r as usize) < n,
                "node {i} has out-of-order children ({l}, {r})"
            );
            let f = self.feature[i];
            anyhow::ensure!(
                f >= 0 && (f as usize) < n_features,
                "node {i} splits on feature {f}, model has {n_features}"
            );
            anyhow::ensure!(self.threshold[i].is_finite(), "node {i} threshold is not finite");
        }
        Ok(())
    }

    #[inline]
    fn leaf_p1(&self, row: &[f64]) -> f64 {
        let mut i = 0usize;
        while self.left[i] >= 0 {
            let x = row[self.feature[i] as usize];
            i = if x <= self.threshold[i] {
                self.left[i] as usize
            } else {
                self.right[i] as usize
            };
        }
        self.p1[i]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    pub trees: Vec<Tree>,
}

impl RandomForest {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.trees.is_empty(), "forest has no trees");
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| anyhow::anyhow!("tree {t}: {e}"))?;
        }
        Ok(())
    }
}

impl Classifier for RandomForest {
    fn predict(&self, row: &[f64]) -> Result<(u8, f64), PredictError> {
        check_width(row, self.n_features)?;
        let sum: f64 = self.trees.iter().map(|t| t.leaf_p1(row)).sum();
        let p1 = clamp01(sum / self.trees.len() as f64);
        Ok((label_of(p1), p1))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn name(&self) -> &'static str {
        "random_forest"
    }
}

/// Logistic regression: `p1 = sigmoid(bias + w·x)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub bias: f64,
    pub weights: Vec<f64>,
}

impl LogisticModel {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.weights.is_empty(), "logistic model has no weights");
        anyhow::ensure!(
            self.bias.is_finite() && self.weights.iter().all(|w| w.is_finite()),
            "logistic model has non-finite parameters"
        );
        Ok(())
    }
}

impl Classifier for LogisticModel {
    fn predict(&self, row: &[f64]) -> Result<(u8, f64), PredictError> {
        check_width(row, self.weights.len())?;
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(row)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        let p1 = clamp01(sigmoid(z));
        Ok((label_of(p1), p1))
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn name(&self) -> &'static str {
        "logistic"
    }
}
