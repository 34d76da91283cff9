use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::analysis::minhash;
use crate::compare::{RatingThresholds, WeightConfig};

/// Deployment configuration, read from the environment once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub coderec_enabled: bool,
    pub coderec_location: Option<PathBuf>,
    pub minhash_signature_len: usize,
    pub minhash_dict_size: u32,
    pub minhash_seed: u64,
    pub max_upload_bytes: usize,
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub weights_file: Option<PathBuf>,
    pub request_deadline_secs: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            port: env_or("PORT", "8080").parse().context("PORT")?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            coderec_enabled: env_or("CODEREC_ENABLED", "false")
                .parse()
                .context("CODEREC_ENABLED")?,
            coderec_location: std::env::var("CODEREC_LOCATION").ok().map(PathBuf::from),
            minhash_signature_len: env_or(
                "MINHASH_SIGNATURE_LEN",
                &minhash::DEFAULT_SIGNATURE_LEN.to_string(),
            )
            .parse()
            .context("MINHASH_SIGNATURE_LEN")?,
            minhash_dict_size: env_or("MINHASH_DICT_SIZE", &minhash::DEFAULT_DICT_SIZE.to_string())
                .parse()
                .context("MINHASH_DICT_SIZE")?,
            minhash_seed: env_or("MINHASH_SEED", &minhash::DEFAULT_SEED.to_string())
                .parse()
                .context("MINHASH_SEED")?,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", "268435456")
                .parse()
                .context("MAX_UPLOAD_BYTES")?,
            high_threshold: env_or("HIGH_THRESHOLD", "0.6094").parse().context("HIGH_THRESHOLD")?,
            low_threshold: env_or("LOW_THRESHOLD", "0.30").parse().context("LOW_THRESHOLD")?,
            weights_file: std::env::var("WEIGHTS_FILE").ok().map(PathBuf::from),
            request_deadline_secs: match std::env::var("REQUEST_DEADLINE_SECS") {
                Ok(v) => Some(v.parse().context("REQUEST_DEADLINE_SECS")?),
                Err(_) => None,
            },
        };

        if config.minhash_signature_len != 128 && config.minhash_signature_len != 512 {
            anyhow::bail!(
                "MINHASH_SIGNATURE_LEN must be 128 or 512, got {}",
                config.minhash_signature_len
            );
        }

        Ok(config)
    }

    pub fn thresholds(&self) -> RatingThresholds {
        RatingThresholds { high: self.high_threshold, low: self.low_threshold }
    }

    /// The active weight maps: the operator override file when configured,
    /// the built-in defaults otherwise. Either way the maps are validated.
    pub fn weights(&self) -> Result<WeightConfig> {
        let weights = match &self.weights_file {
            Some(path) => {
                let raw = std::fs::read(path)
                    .with_context(|| format!("reading weights file {}", path.display()))?;
                serde_json::from_slice(&raw)
                    .with_context(|| format!("parsing weights file {}", path.display()))?
            }
            None => WeightConfig::default(),
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(Duration::from_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_file_overrides_deserialize() {
        let json = r#"{
            "full": {"STRING_MINHASH": 0.5, "PROGRAM_HEADER_VECTOR": 0.5},
            "fallback": {"STRING_MINHASH": 1.0}
        }"#;
        let weights: WeightConfig = serde_json::from_str(json).unwrap();
        weights.validate().unwrap();
        assert_eq!(weights.fallback.len(), 1);
    }
}
