//! Training configuration, read from TOML and overridable from the command
//! line.

use crate::error::{Result, StnError};
use crate::utils::cifar::Normalization;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// `train/` and `test/` directories of `<index>_<label>.png` files.
    Images,
    /// CIFAR-10 binary batches: `data_batch_{1..5}.bin` and `test_batch.bin`.
    Binary,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub data_dir: PathBuf,
    pub format: DataFormat,
    /// Cap on samples loaded per split.
    pub limit: Option<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    pub seed: u64,
    /// Worker threads; 0 means one per logical CPU.
    pub threads: usize,
    /// Iterations between loss reports.
    pub log_interval: usize,
    pub normalize_mean: [f32; 3],
    pub normalize_std: [f32; 3],
    /// Where to write the input/transformed comparison after training.
    pub samples_out: Option<PathBuf>,
    pub samples: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            format: DataFormat::Images,
            limit: None,
            epochs: 20,
            batch_size: 64,
            test_batch_size: 1000,
            learning_rate: 0.01,
            momentum: 0.9,
            weight_decay: 1e-4,
            seed: 0,
            threads: 0,
            log_interval: 50,
            normalize_mean: [0.5; 3],
            normalize_std: [0.5; 3],
            samples_out: None,
            samples: 8,
        }
    }
}

impl TrainConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: TrainConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return Err(StnError::config("batch sizes must be positive"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(StnError::config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(StnError::config(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(StnError::config("weight_decay must not be negative"));
        }
        if self.normalize_std.iter().any(|s| *s <= 0.0) {
            return Err(StnError::config("normalize_std entries must be positive"));
        }
        if self.log_interval == 0 {
            return Err(StnError::config("log_interval must be positive"));
        }
        Ok(())
    }

    pub fn normalization(&self) -> Normalization {
        Normalization {
            mean: self.normalize_mean,
            std: self.normalize_std,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = TrainConfig::from_toml(
            r#"
            data_dir = "/tmp/cifar-10-batches-bin"
            format = "binary"
            epochs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.format, DataFormat::Binary);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, TrainConfig::default().batch_size);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            TrainConfig::from_toml("momentum = 1.5"),
            Err(StnError::Config(_))
        ));
        assert!(matches!(
            TrainConfig::from_toml("batch_size = 0"),
            Err(StnError::Config(_))
        ));
        assert!(matches!(
            TrainConfig::from_toml("unknown_key = 1"),
            Err(StnError::Toml(_))
        ));
    }
}
