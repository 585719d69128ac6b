use crate::error::PredictError;
use crate::schema::{N_NUMERIC, NUMERIC_FEATURES};
use serde::{Deserialize, Serialize};

/// Standard-scaler parameters for the numeric columns, in schema order.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mean: [f64; N_NUMERIC],
    scale: [f64; N_NUMERIC],
}

/// On-disk form (`scaler.json`). `features` is optional but, when present,
/// must list the numeric columns in schema order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    #[serde(default)]
    pub features: Option<Vec<String>>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Normalizer {
    pub fn new(mean: &[f64], scale: &[f64]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            mean.len() == N_NUMERIC && scale.len() == N_NUMERIC,
            "scaler must have {N_NUMERIC} entries (mean={}, scale={})",
            mean.len(),
            scale.len()
        );

        let mut m = [0.0; N_NUMERIC];
        let mut s = [1.0; N_NUMERIC];
        for i in 0..N_NUMERIC {
            let name = NUMERIC_FEATURES[i];
            anyhow::ensure!(mean[i].is_finite(), "scaler mean for {name} is not finite");
            anyhow::ensure!(
                scale[i].is_finite() && scale[i] != 0.0,
                "scaler scale for {name} must be finite and non-zero, got {}",
                scale[i]
            );
            m[i] = mean[i];
            s[i] = scale[i];
        }
        Ok(Self { mean: m, scale: s })
    }

    pub fn from_artifact(a: &ScalerArtifact) -> anyhow::Result<Self> {
        if let Some(names) = &a.features {
            anyhow::ensure!(
                names.iter().map(String::as_str).eq(NUMERIC_FEATURES.iter().copied()),
                "scaler feature order {names:?} does not match schema {NUMERIC_FEATURES:?}"
            );
        }
        Self::new(&a.mean, &a.scale)
    }

    /// Identity transform (mean 0, scale 1).
    pub fn identity() -> Self {
        Self {
            mean: [0.0; N_NUMERIC],
            scale: [1.0; N_NUMERIC],
        }
    }

    pub fn normalize(&self, values: &[f64]) -> Result<Vec<f64>, PredictError> {
        if values.len() != N_NUMERIC {
            return Err(PredictError::ModelInput {
                expected: N_NUMERIC,
                got: values.len(),
            });
        }
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let z = (v - self.mean[i]) / self.scale[i];
                // a finite input can still overflow once scaled
                if !v.is_finite() || !z.is_finite() {
                    return Err(PredictError::InvalidNumericValue(NUMERIC_FEATURES[i]));
                }
                Ok(z)
            })
            .collect()
    }
}
