//! Run configuration.
//!
//! A [`DrqnConfig`] is built once (defaults, YAML file, CLI overrides),
//! validated, and then handed by reference to every component that needs it.
use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DrqnError, Result},
    optimizer::OptimizerConfig,
};

/// Exponentially decaying exploration rate.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EpsilonSchedule {
    pub start: f64,
    #[serde(rename = "final")]
    pub final_value: f64,
    pub decay: f64,
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            start: 1.0,
            final_value: 0.01,
            decay: 30_000.0,
        }
    }
}

impl EpsilonSchedule {
    /// Exploration probability at environment step `step`.
    pub fn epsilon(&self, step: usize) -> f64 {
        self.final_value + (self.start - self.final_value) * (-(step as f64) / self.decay).exp()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DrqnConfig {
    pub discount_factor: f64,
    pub optimizer: OptimizerConfig,
    /// Global L2 norm gradients are clipped to before each optimiser step.
    pub max_grad_norm: f32,
    pub replay_capacity: usize,
    pub batch_size: usize,
    pub sequence_length: usize,
    /// Environment steps between hard copies of the live estimator into the delayed one.
    pub target_update_freq: usize,
    pub learn_start: usize,
    pub max_frames: usize,
    pub n_steps: usize,
    pub hidden_size: usize,
    pub encoder_layers: Vec<usize>,
    pub epsilon: EpsilonSchedule,
    pub log_interval: usize,
    pub snapshot_interval: usize,
    pub seed: u64,
}

impl Default for DrqnConfig {
    fn default() -> Self {
        Self {
            discount_factor: 0.99,
            optimizer: OptimizerConfig::default(),
            max_grad_norm: 10.0,
            replay_capacity: 10_000,
            batch_size: 32,
            sequence_length: 8,
            target_update_freq: 1_024,
            learn_start: 10_000,
            max_frames: 1_500_000,
            n_steps: 1,
            hidden_size: 64,
            encoder_layers: vec![128],
            epsilon: EpsilonSchedule::default(),
            log_interval: 1_000,
            snapshot_interval: 50_000,
            seed: 0,
        }
    }
}

impl DrqnConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_yaml::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("replay_capacity", self.replay_capacity),
            ("batch_size", self.batch_size),
            ("sequence_length", self.sequence_length),
            ("target_update_freq", self.target_update_freq),
            ("n_steps", self.n_steps),
            ("hidden_size", self.hidden_size),
            ("log_interval", self.log_interval),
            ("snapshot_interval", self.snapshot_interval),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(DrqnError::InvalidConfig(format!("{name} must be positive")));
        }
        if self.batch_size > self.replay_capacity {
            return Err(DrqnError::InvalidConfig(format!(
                "batch_size ({}) exceeds replay_capacity ({})",
                self.batch_size, self.replay_capacity
            )));
        }
        if !(self.discount_factor > 0.0 && self.discount_factor <= 1.0) {
            return Err(DrqnError::InvalidConfig(format!(
                "discount_factor must lie in (0, 1], got {}",
                self.discount_factor
            )));
        }
        let eps = &self.epsilon;
        if !(0.0..=1.0).contains(&eps.start) || !(0.0..=1.0).contains(&eps.final_value) {
            return Err(DrqnError::InvalidConfig(
                "epsilon start and final must lie in [0, 1]".to_string(),
            ));
        }
        if eps.decay <= 0.0 {
            return Err(DrqnError::InvalidConfig("epsilon decay must be positive".to_string()));
        }
        if self.encoder_layers.iter().any(|&w| w == 0) {
            return Err(DrqnError::InvalidConfig(
                "encoder layer widths must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Factor applied to the bootstrapped value of an n-step target.
    pub fn bootstrap_discount(&self) -> f64 {
        self.discount_factor.powi(self.n_steps as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn epsilon_decays_from_start_to_final() {
        let schedule = EpsilonSchedule::default();
        assert!((schedule.epsilon(0) - 1.0).abs() < 1e-12);
        let mid = schedule.epsilon(30_000);
        let expected = 0.01 + 0.99 * (-1.0f64).exp();
        assert!((mid - expected).abs() < 1e-12);
        assert!(schedule.epsilon(10_000_000) - 0.01 < 1e-9);
        assert!(schedule.epsilon(100) > schedule.epsilon(200));
    }

    #[test]
    fn default_config_is_valid() {
        DrqnConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_batch_larger_than_capacity() {
        let config = DrqnConfig {
            replay_capacity: 16,
            batch_size: 32,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DrqnError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_sequence_length() {
        let config = DrqnConfig {
            sequence_length: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sequence_length"));
    }

    #[test]
    fn yaml_round_trip_and_partial_files() -> anyhow::Result<()> {
        let dir = TempDir::new("drqn_config")?;
        let path = dir.path().join("config.yaml");
        let config = DrqnConfig {
            sequence_length: 4,
            n_steps: 3,
            ..Default::default()
        };
        config.save(&path)?;
        assert_eq!(DrqnConfig::load(&path)?, config);

        let partial = dir.path().join("partial.yaml");
        std::fs::write(
            &partial,
            "batch_size: 8\nepsilon:\n  start: 0.5\n  final: 0.05\n  decay: 100.0\n",
        )?;
        let loaded = DrqnConfig::load(&partial)?;
        assert_eq!(loaded.batch_size, 8);
        assert_eq!(loaded.epsilon.final_value, 0.05);
        assert_eq!(loaded.sequence_length, 8);
        Ok(())
    }

    #[test]
    fn bootstrap_discount_uses_n_steps() {
        let config = DrqnConfig {
            discount_factor: 0.5,
            n_steps: 3,
            ..Default::default()
        };
        assert!((config.bootstrap_discount() - 0.125).abs() < 1e-12);
    }
}
