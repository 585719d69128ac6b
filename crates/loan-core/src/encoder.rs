use crate::error::PredictError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Fixed category vocabulary for the `purpose` column.
///
/// Codes follow the label-encoder convention used at fit time: the vocabulary
/// is sorted and a category's code is its index in that order.
#[derive(Debug, Clone)]
pub struct CategoricalEncoder {
    classes: Vec<String>,
    codes: HashMap<String, u32>,
}

/// On-disk form (`label_encoder.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderArtifact {
    pub classes: Vec<String>,
}

impl CategoricalEncoder {
    pub fn new<I, S>(classes: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        anyhow::ensure!(!classes.is_empty(), "categorical vocabulary is empty");
        classes.sort();

        let mut codes = HashMap::with_capacity(classes.len());
        for (i, c) in classes.iter().enumerate() {
            anyhow::ensure!(!c.is_empty(), "categorical vocabulary contains an empty class");
            if codes.insert(c.clone(), i as u32).is_some() {
                anyhow::bail!("duplicate class in categorical vocabulary: {c}");
            }
        }
        Ok(Self { classes, codes })
    }

    pub fn from_artifact(a: EncoderArtifact) -> anyhow::Result<Self> {
        Self::new(a.classes)
    }

    pub fn encode(&self, category: &str) -> Result<u32, PredictError> {
        self.codes
            .get(category)
            .copied()
            .ok_or_else(|| PredictError::UnknownCategory {
                value: category.to_string(),
                valid: self.classes.clone(),
            })
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    /// Sorted list of accepted categories.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
