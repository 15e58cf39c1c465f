//! Recurrent action-value estimator.
//!
//! Observations go through a feed-forward encoder, a single-layer GRU and a
//! linear head producing one value per action at every timestep.
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{
    Linear, Module, VarBuilder, VarMap, linear,
    rnn::{GRU, GRUConfig, GRUState, RNN, gru},
};

use crate::{
    config::DrqnConfig,
    error::{DrqnError, Result},
    mlp::MultiLayerPerceptron,
};

/// Recurrent context carried between forward passes.
#[derive(Debug, Clone)]
pub struct HiddenState(GRUState);

pub trait RecurrentEstimator {
    /// Maps `(batch, time, *obs_shape)` to `(batch, time, num_actions)`,
    /// continuing from `hidden`.
    fn forward_with_state(
        &self,
        states: &Tensor,
        hidden: &HiddenState,
    ) -> Result<(Tensor, HiddenState)>;

    fn init_hidden(&self, batch_size: usize) -> Result<HiddenState>;

    fn num_actions(&self) -> usize;

    /// Same as [`forward_with_state`](Self::forward_with_state) from a zero hidden state.
    fn forward_fresh(&self, states: &Tensor) -> Result<(Tensor, HiddenState)> {
        let hidden = self.init_hidden(states.dim(0)?)?;
        self.forward_with_state(states, &hidden)
    }
}

pub struct DrqnNetwork {
    var_map: VarMap,
    encoder: MultiLayerPerceptron,
    gru: GRU,
    head: Linear,
    obs_shape: Vec<usize>,
    num_actions: usize,
}

impl DrqnNetwork {
    pub fn new(
        obs_shape: &[usize],
        num_actions: usize,
        config: &DrqnConfig,
        device: &Device,
    ) -> Result<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let obs_len: usize = obs_shape.iter().product();
        let mut topology = vec![obs_len];
        topology.extend_from_slice(&config.encoder_layers);
        let encoder = MultiLayerPerceptron::new(&topology, vb.pp("encoder"))?;
        let gru = gru(
            encoder.output_dim(),
            config.hidden_size,
            GRUConfig::default(),
            vb.pp("gru"),
        )?;
        let head = linear(config.hidden_size, num_actions, vb.pp("head"))?;

        Ok(Self {
            var_map,
            encoder,
            gru,
            head,
            obs_shape: obs_shape.to_vec(),
            num_actions,
        })
    }

    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Overwrites every parameter with the value of the same-named parameter
    /// of `source`.
    pub fn copy_parameters_from(&mut self, source: &DrqnNetwork) -> Result<()> {
        let source_vars = source
            .var_map
            .data()
            .lock()
            .map_err(|_| DrqnError::PoisonedParameters)?;
        let target_vars = self
            .var_map
            .data()
            .lock()
            .map_err(|_| DrqnError::PoisonedParameters)?;
        for (name, source_var) in source_vars.iter() {
            if let Some(target_var) = target_vars.get(name) {
                target_var.set(source_var.as_tensor())?;
            }
        }
        Ok(())
    }

    /// Largest absolute difference between same-named parameters.
    pub fn parameter_distance(&self, other: &DrqnNetwork) -> Result<f32> {
        let own = self
            .var_map
            .data()
            .lock()
            .map_err(|_| DrqnError::PoisonedParameters)?;
        let theirs = other
            .var_map
            .data()
            .lock()
            .map_err(|_| DrqnError::PoisonedParameters)?;
        let mut distance = 0f32;
        for (name, var) in own.iter() {
            if let Some(other_var) = theirs.get(name) {
                let d = (var.as_tensor() - other_var.as_tensor())?
                    .abs()?
                    .flatten_all()?
                    .max(0)?
                    .to_scalar::<f32>()?;
                distance = distance.max(d);
            }
        }
        Ok(distance)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.var_map.save(path)?;
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.var_map.load(path)?;
        Ok(())
    }
}

impl RecurrentEstimator for DrqnNetwork {
    fn forward_with_state(
        &self,
        states: &Tensor,
        hidden: &HiddenState,
    ) -> Result<(Tensor, HiddenState)> {
        let dims = states.dims();
        let obs_len: usize = self.obs_shape.iter().product();
        let actual: usize = dims.iter().skip(2).product();
        if dims.len() < 3 || actual != obs_len {
            return Err(DrqnError::ShapeMismatch {
                expected: obs_len,
                actual,
            });
        }
        let (batch_size, time) = (dims[0], dims[1]);

        let x = states.reshape((batch_size * time, obs_len))?;
        let features = self
            .encoder
            .forward(&x)?
            .reshape((batch_size, time, self.encoder.output_dim()))?;

        let gru_states = self.gru.seq_init(&features, &hidden.0)?;
        let hs: Vec<Tensor> = gru_states.iter().map(|s| s.h().clone()).collect();
        let out = Tensor::stack(&hs, 1)?;
        let q_values = self.head.forward(&out)?;

        let last = match gru_states.last() {
            Some(state) => state.clone(),
            None => hidden.0.clone(),
        };
        Ok((q_values, HiddenState(last)))
    }

    fn init_hidden(&self, batch_size: usize) -> Result<HiddenState> {
        Ok(HiddenState(self.gru.zero_state(batch_size)?))
    }

    fn num_actions(&self) -> usize {
        self.num_actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use tempdir::TempDir;

    fn config() -> DrqnConfig {
        DrqnConfig {
            hidden_size: 8,
            encoder_layers: vec![16],
            ..Default::default()
        }
    }

    fn network() -> Result<DrqnNetwork> {
        DrqnNetwork::new(&[2, 3], 4, &config(), &Device::Cpu)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> candle_core::Result<f32> {
        (a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()
    }

    #[test]
    fn forward_shapes() -> anyhow::Result<()> {
        let net = network()?;
        let x = Tensor::randn(0f32, 1.0, (5, 7, 2, 3), &Device::Cpu)?;
        let (q, hidden) = net.forward_fresh(&x)?;
        assert_eq!(q.dims(), &[5, 7, 4]);
        assert_eq!(hidden.0.h().dims(), &[5, 8]);
        assert_eq!(net.init_hidden(3)?.0.h().dims(), &[3, 8]);
        Ok(())
    }

    #[test]
    fn every_timestep_reads_its_own_hidden_state() -> anyhow::Result<()> {
        let net = DrqnNetwork::new(&[1], 2, &config(), &Device::Cpu)?;
        let x = Tensor::randn(0f32, 1.0, (5, 3, 1), &Device::Cpu)?;
        let (q, _) = net.forward_fresh(&x)?;
        assert_eq!(q.dims(), &[5, 3, 2]);

        for t in 0..3 {
            let (q_prefix, _) = net.forward_fresh(&x.i((.., 0..t + 1))?)?;
            assert_eq!(q_prefix.dims(), &[5, t + 1, 2]);
            assert!(max_abs_diff(&q.i((.., t))?, &q_prefix.i((.., t))?)? < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn fresh_forward_starts_from_zero_state() -> anyhow::Result<()> {
        let net = network()?;
        let x = Tensor::randn(0f32, 1.0, (2, 4, 2, 3), &Device::Cpu)?;
        let zero = net.init_hidden(2)?;
        assert_eq!(zero.0.h().sum_all()?.to_scalar::<f32>()?, 0.0);
        let (q_fresh, _) = net.forward_fresh(&x)?;
        let (q_state, _) = net.forward_with_state(&x, &zero)?;
        assert!(max_abs_diff(&q_fresh, &q_state)? < 1e-6);
        Ok(())
    }

    #[test]
    fn continuing_with_state_matches_one_long_pass() -> anyhow::Result<()> {
        let net = network()?;
        let x = Tensor::randn(0f32, 1.0, (2, 6, 2, 3), &Device::Cpu)?;
        let (q_full, h_full) = net.forward_fresh(&x)?;

        let (_, h_half) = net.forward_fresh(&x.i((.., 0..3))?)?;
        let (q_rest, h_rest) = net.forward_with_state(&x.i((.., 3..6))?, &h_half)?;

        assert!(max_abs_diff(&q_full.i((.., 3..6))?, &q_rest)? < 1e-5);
        assert!(max_abs_diff(h_full.0.h(), h_rest.0.h())? < 1e-5);
        Ok(())
    }

    #[test]
    fn rejects_wrong_observation_shape() -> anyhow::Result<()> {
        let net = network()?;
        let x = Tensor::zeros((1, 2, 5), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            net.forward_fresh(&x),
            Err(DrqnError::ShapeMismatch { expected: 6, actual: 5 })
        ));
        Ok(())
    }

    #[test]
    fn hard_copy_makes_networks_identical() -> anyhow::Result<()> {
        let live = network()?;
        let mut delayed = network()?;
        assert!(delayed.parameter_distance(&live)? > 0.0);

        delayed.copy_parameters_from(&live)?;
        assert_eq!(delayed.parameter_distance(&live)?, 0.0);

        let x = Tensor::randn(0f32, 1.0, (3, 4, 2, 3), &Device::Cpu)?;
        let (a, _) = live.forward_fresh(&x)?;
        let (b, _) = delayed.forward_fresh(&x)?;
        assert_eq!(max_abs_diff(&a, &b)?, 0.0);
        Ok(())
    }

    #[test]
    fn save_and_load_round_trip() -> anyhow::Result<()> {
        let dir = TempDir::new("drqn_network")?;
        let path = dir.path().join("qnet.safetensors");
        let saved = network()?;
        saved.save(&path)?;

        let mut loaded = network()?;
        assert!(loaded.parameter_distance(&saved)? > 0.0);
        loaded.load(&path)?;
        assert_eq!(loaded.parameter_distance(&saved)?, 0.0);
        Ok(())
    }
}
