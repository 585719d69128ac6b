// crates/loan-core/src/schema.rs
use serde::{Deserialize, Serialize};

pub const N_FEATURES: usize = 13;
pub const N_NUMERIC: usize = N_FEATURES - 1;

/// Column order the scaler and the classifier were fit with. Never reorder.
pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "credit.policy",
    "purpose",
    "int.rate",
    "installment",
    "log.annual.inc",
    "dti",
    "fico",
    "days.with.cr.line",
    "revol.bal",
    "revol.util",
    "inq.last.6mths",
    "delinq.2yrs",
    "pub.rec",
];

pub const CATEGORICAL_FEATURE: &str = "purpose";
pub const CATEGORICAL_INDEX: usize = 1;

/// Numeric subset, in schema order (categorical column removed).
pub const NUMERIC_FEATURES: [&str; N_NUMERIC] = [
    "credit.policy",
    "int.rate",
    "installment",
    "log.annual.inc",
    "dti",
    "fico",
    "days.with.cr.line",
    "revol.bal",
    "revol.util",
    "inq.last.6mths",
    "delinq.2yrs",
    "pub.rec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

pub fn index_of(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

pub fn kind_of(name: &str) -> Option<FeatureKind> {
    index_of(name).map(|i| {
        if i == CATEGORICAL_INDEX {
            FeatureKind::Categorical
        } else {
            FeatureKind::Numeric
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Repaid,
    AtRisk,
}

impl Label {
    /// Model class 0 is "fully paid"; anything else is non-repayment.
    #[inline]
    pub fn from_class(class: u8) -> Self {
        if class == 0 { Label::Repaid } else { Label::AtRisk }
    }

    pub fn text(self) -> &'static str {
        match self {
            Label::Repaid => "Loan Likely to be Repaid",
            Label::AtRisk => "Loan at Risk of Non-Repayment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: Label,
    /// Probability mass of `label`, always finite and in [0, 1].
    pub confidence: f64,
}

/// Wire shape returned by `/predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub result: String,
    pub label: Label,
    /// Percentage with two decimals, e.g. "87.50%".
    pub confidence: String,
}

impl From<PredictionResult> for PredictResponse {
    fn from(r: PredictionResult) -> Self {
        Self {
            result: r.label.text().to_string(),
            label: r.label,
            confidence: format_confidence(r.confidence),
        }
    }
}

pub fn format_confidence(c: f64) -> String {
    format!("{:.2}%", c * 100.0)
}
