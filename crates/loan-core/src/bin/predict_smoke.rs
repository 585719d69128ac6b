use std::path::PathBuf;

use loan_core::{artifacts::ModelArtifacts, pipeline::PredictionPipeline, schema::PredictResponse};

fn main() -> anyhow::Result<()> {
    // 1) model dir: first arg, defaults to models/
    let model_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models"));

    // 2) load artifacts (label_encoder / scaler / forest|logistic)
    let artifacts = ModelArtifacts::load_from_dir(&model_dir)?;
    println!("classifier={}", artifacts.classifier.name());
    println!("purposes={:?}", artifacts.encoder.classes());

    // 3) one complete sample
    let obj = serde_json::json!({
        "credit.policy": "1",
        "purpose": "debt_consolidation",
        "int.rate": "0.1189",
        "installment": "829.10",
        "log.annual.inc": "11.35",
        "dti": "19.48",
        "fico": "737",
        "days.with.cr.line": "5639.96",
        "revol.bal": "28854",
        "revol.util": "52.1",
        "inq.last.6mths": "0",
        "delinq.2yrs": "0",
        "pub.rec": "0"
    });
    let obj = obj
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("sample is not an object"))?;

    // 4) encode + normalize + predict
    let pipeline = PredictionPipeline::new(artifacts, None);
    let row = pipeline.prepare(&loan_core::pipeline::ValidatedFeatures::parse(&obj)?)?;
    println!("row={row:?}");

    let res = pipeline.predict_request(&obj, None)?;
    println!("{}", serde_json::to_string_pretty(&PredictResponse::from(res))?);

    Ok(())
}
