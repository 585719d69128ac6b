use crate::{
    artifacts::ModelArtifacts,
    error::PredictError,
    history::{HistoryRecord, HistorySink},
    schema::{
        Label, PredictionResult, CATEGORICAL_INDEX, FEATURE_NAMES, N_FEATURES, N_NUMERIC,
    },
    util::{clamp01, now_ms, now_us},
};

use serde_json::{Map, Value};
use std::time::Instant;
use uuid::Uuid;

/// Request body after presence and type checks.
///
/// `numeric` holds the 12 numeric columns in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFeatures {
    pub category: String,
    pub numeric: [f64; N_NUMERIC],
}

impl ValidatedFeatures {
    /// Fails on the first violation, in schema order: every field's presence
    /// first, then numeric coercion. Empty or blank strings count as missing.
    /// The category is kept verbatim; the encoder matches it exactly.
    pub fn parse(raw: &Map<String, Value>) -> Result<Self, PredictError> {
        for name in FEATURE_NAMES {
            if is_missing(raw.get(name)) {
                return Err(PredictError::MissingField(name));
            }
        }

        let mut numeric = [0.0; N_NUMERIC];
        let mut slot = 0usize;
        let mut category = String::new();
        for (i, name) in FEATURE_NAMES.into_iter().enumerate() {
            let v = &raw[name];
            if i == CATEGORICAL_INDEX {
                category = match v {
                    Value::String(s) => s.clone(),
                    _ => return Err(PredictError::InvalidFormat(name)),
                };
                continue;
            }
            numeric[slot] = coerce_f64(v).ok_or(PredictError::InvalidFormat(name))?;
            slot += 1;
        }

        Ok(Self { category, numeric })
    }
}

fn is_missing(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn coerce_f64(v: &Value) -> Option<f64> {
    let x = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    x.is_finite().then_some(x)
}

/// Label 0 keeps `1 - p1`, anything else keeps `p1`. Never NaN, never outside [0, 1].
pub fn shape_result(class: u8, p1: f64) -> PredictionResult {
    let label = Label::from_class(class);
    let confidence = match label {
        Label::Repaid => 1.0 - p1,
        Label::AtRisk => p1,
    };
    let confidence = if confidence.is_finite() {
        clamp01(confidence)
    } else {
        0.0
    };
    PredictionResult { label, confidence }
}

/// The prediction core: immutable artifacts plus an optional history queue.
/// Shared across request handlers behind an `Arc`; nothing here is mutated
/// after construction.
#[derive(Clone, Debug)]
pub struct PredictionPipeline {
    artifacts: ModelArtifacts,
    history: Option<HistorySink>,
}

impl PredictionPipeline {
    pub fn new(artifacts: ModelArtifacts, history: Option<HistorySink>) -> Self {
        Self { artifacts, history }
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    /// Encode and normalize into the row the classifier was fit on.
    pub fn prepare(&self, feats: &ValidatedFeatures) -> Result<Vec<f64>, PredictError> {
        let code = self.artifacts.encoder.encode(&feats.category)?;
        let scaled = self.artifacts.normalizer.normalize(&feats.numeric)?;

        let mut row = Vec::with_capacity(N_FEATURES);
        row.extend_from_slice(&scaled[..CATEGORICAL_INDEX]);
        row.push(code as f64);
        row.extend_from_slice(&scaled[CATEGORICAL_INDEX..]);
        Ok(row)
    }

    /// Pure part of a request: validation through result shaping.
    pub fn evaluate(&self, raw: &Map<String, Value>) -> Result<PredictionResult, PredictError> {
        let t_val = Instant::now();
        let feats = ValidatedFeatures::parse(raw)?;
        let row = self.prepare(&feats)?;
        metrics::histogram!("stage_validate_us").record(now_us(t_val) as f64);

        let t_inf = Instant::now();
        let (class, p1) = self.artifacts.classifier.predict(&row)?;
        metrics::histogram!("stage_infer_us").record(now_us(t_inf) as f64);

        Ok(shape_result(class, p1))
    }

    /// Full request: evaluate, then hand a history record to the writer.
    /// History failures are logged and counted, never returned.
    pub fn predict_request(
        &self,
        raw: &Map<String, Value>,
        identity: Option<&str>,
    ) -> Result<PredictionResult, PredictError> {
        let t0 = Instant::now();
        let out = self.evaluate(raw);

        match &out {
            Ok(res) => {
                metrics::counter!("predict_total").increment(1);
                self.record(raw, identity, res);
            }
            Err(e) if e.is_client_error() => {
                metrics::counter!("predict_rejected_total", "kind" => e.kind()).increment(1);
                tracing::debug!(err = %e, "prediction rejected");
            }
            Err(e) => {
                metrics::counter!("predict_rejected_total", "kind" => e.kind()).increment(1);
                tracing::error!(err = %e, "artifacts do not match feature schema");
            }
        }

        metrics::histogram!("e2e_us").record(now_us(t0) as f64);
        out
    }

    fn record(&self, raw: &Map<String, Value>, identity: Option<&str>, res: &PredictionResult) {
        let Some(sink) = &self.history else {
            return;
        };
        let rec = HistoryRecord {
            id: Uuid::new_v4(),
            identity: identity.map(str::to_string),
            input: raw.clone(),
            label: res.label,
            result: res.label.text().to_string(),
            confidence: res.confidence,
            timestamp_ms: now_ms(),
        };
        if let Err(e) = sink.try_submit(rec) {
            metrics::counter!("history_dropped_total").increment(1);
            tracing::warn!(err = %e, "history record dropped");
        }
    }
}
