//! Offline-trained parameter bundles, loaded once at startup.
//!
//! Directory layout (each file may also ship gzip-compressed as `*.json.gz`):
//! - `label_encoder.json`: `{"classes": [...]}`
//! - `scaler.json`: `{"features"?: [...], "mean": [...], "scale": [...]}`
//! - `forest.json` (preferred) or `logistic.json`

use crate::encoder::{CategoricalEncoder, EncoderArtifact};
use crate::model::{Classifier, LogisticModel, RandomForest};
use crate::normalizer::{Normalizer, ScalerArtifact};
use crate::schema::N_FEATURES;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct ModelArtifacts {
    pub encoder: CategoricalEncoder,
    pub normalizer: Normalizer,
    pub classifier: Arc<dyn Classifier>,
}

impl std::fmt::Debug for ModelArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifacts")
            .field("vocabulary", &self.encoder.classes())
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

impl ModelArtifacts {
    /// Assemble from already-built parts. Fails when the classifier width
    /// does not match the feature schema.
    pub fn new(
        encoder: CategoricalEncoder,
        normalizer: Normalizer,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        anyhow::ensure!(
            classifier.n_features() == N_FEATURES,
            "{} model expects {} features, schema has {N_FEATURES}",
            classifier.name(),
            classifier.n_features()
        );
        Ok(Self {
            encoder,
            normalizer,
            classifier,
        })
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let enc: EncoderArtifact = read_json(dir, "label_encoder")?
            .ok_or_else(|| missing(dir, "label_encoder"))?;
        let encoder = CategoricalEncoder::from_artifact(enc)
            .with_context(|| format!("label_encoder in {}", dir.display()))?;

        let scaler: ScalerArtifact =
            read_json(dir, "scaler")?.ok_or_else(|| missing(dir, "scaler"))?;
        let normalizer = Normalizer::from_artifact(&scaler)
            .with_context(|| format!("scaler in {}", dir.display()))?;

        let classifier = load_classifier(dir)?;

        let out = Self::new(encoder, normalizer, classifier)?;
        tracing::info!(
            model_dir = %dir.display(),
            classifier = out.classifier.name(),
            vocabulary = out.encoder.len(),
            "model artifacts loaded"
        );
        Ok(out)
    }
}

fn load_classifier(dir: &Path) -> Result<Arc<dyn Classifier>> {
    if let Some(forest) = read_json::<RandomForest>(dir, "forest")? {
        forest
            .validate()
            .with_context(|| format!("forest in {}", dir.display()))?;
        return Ok(Arc::new(forest));
    }
    if let Some(lr) = read_json::<LogisticModel>(dir, "logistic")? {
        lr.validate()
            .with_context(|| format!("logistic in {}", dir.display()))?;
        return Ok(Arc::new(lr));
    }
    Err(anyhow!(
        "missing classifier in model_dir={}, expected forest.json or logistic.json",
        dir.display()
    ))
}

fn missing(dir: &Path, stem: &str) -> anyhow::Error {
    anyhow!(
        "missing {stem}.json (or {stem}.json.gz) in model_dir={}",
        dir.display()
    )
}

fn candidates(dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{stem}.json")),
        dir.join(format!("{stem}.json.gz")),
    )
}

/// Plain JSON wins over `.json.gz`. `Ok(None)` when neither exists.
fn read_json<T: DeserializeOwned>(dir: &Path, stem: &str) -> Result<Option<T>> {
    let (plain, gz) = candidates(dir, stem);
    if plain.exists() {
        let s = fs::read_to_string(&plain)
            .with_context(|| format!("read {}", plain.display()))?;
        let v = serde_json::from_str(&s)
            .with_context(|| format!("parse {}", plain.display()))?;
        return Ok(Some(v));
    }
    if gz.exists() {
        let f = fs::File::open(&gz).with_context(|| format!("open {}", gz.display()))?;
        let dec = flate2::read::GzDecoder::new(f);
        let v = serde_json::from_reader(dec)
            .with_context(|| format!("parse {}", gz.display()))?;
        return Ok(Some(v));
    }
    Ok(None)
}
