use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime config. Fields missing from the file take defaults; CLI and env
/// override on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: String,

    /// Directory holding label_encoder / scaler / forest artifacts.
    pub model_dir: PathBuf,

    /// Append-only JSON-lines history file; `None` keeps history in memory.
    pub history_path: Option<PathBuf>,

    /// Bounded history queue. Records beyond this are dropped, not awaited.
    pub history_queue_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
            model_dir: PathBuf::from("models"),
            history_path: Some(PathBuf::from("data/history.jsonl")),
            history_queue_cap: 1024,
        }
    }
}

impl Config {
    /// Missing file is not an error: the defaults apply.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&s)
            .with_context(|| format!("parse config: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.history_queue_cap > 0, "history_queue_cap must be > 0");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("cfg.json");
        std::fs::write(&p, r#"{"model_dir": "/srv/models"}"#).unwrap();
        let cfg = Config::load(&p).unwrap();
        assert_eq!(cfg.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(cfg.history_queue_cap, 1024);
        assert_eq!(cfg.listen, "127.0.0.1:5000");
    }

    #[test]
    fn absent_file_is_default() {
        let cfg = Config::load(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(cfg.history_queue_cap, Config::default().history_queue_cap);
    }

    #[test]
    fn zero_queue_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("cfg.json");
        std::fs::write(&p, r#"{"history_queue_cap": 0}"#).unwrap();
        assert!(Config::load(&p).is_err());
    }
}
