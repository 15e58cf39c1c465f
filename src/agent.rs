use std::{fs, path::Path};

use candle_core::{D, Device, IndexOp};
use log::{debug, trace};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    batch::Batch,
    config::DrqnConfig,
    error::{DrqnError, Result},
    loss::compute_loss,
    memory::RecurrentReplayMemory,
    network::{DrqnNetwork, RecurrentEstimator},
    nstep::NStepAccumulator,
    optimizer::{clip_gradients, Optimizer},
    window::ObservationWindow,
};

/// How an action was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    Exploring,
    Exploiting,
}

pub struct DrqnAgent {
    config: DrqnConfig,
    policy_net: DrqnNetwork,
    target_net: DrqnNetwork,
    optimizer: Optimizer,
    memory: RecurrentReplayMemory,
    nstep: NStepAccumulator,
    window: ObservationWindow,
    obs_shape: Vec<usize>,
    obs_len: usize,
    device: Device,
    rng: StdRng,
    steps_done: usize,
}

impl DrqnAgent {
    pub fn new(
        config: &DrqnConfig,
        obs_shape: &[usize],
        num_actions: usize,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let obs_len = obs_shape.iter().product();
        let policy_net = DrqnNetwork::new(obs_shape, num_actions, config, device)?;
        let mut target_net = DrqnNetwork::new(obs_shape, num_actions, config, device)?;
        target_net.copy_parameters_from(&policy_net)?;
        let optimizer = config.optimizer.build(policy_net.var_map().all_vars())?;

        Ok(Self {
            config: config.clone(),
            policy_net,
            target_net,
            optimizer,
            memory: RecurrentReplayMemory::from_config(config, obs_len),
            nstep: NStepAccumulator::new(config.n_steps, config.discount_factor),
            window: ObservationWindow::new(config.sequence_length, obs_shape),
            obs_shape: obs_shape.to_vec(),
            obs_len,
            device: device.clone(),
            rng: StdRng::seed_from_u64(config.seed),
            steps_done: 0,
        })
    }

    pub fn memory(&self) -> &RecurrentReplayMemory {
        &self.memory
    }

    fn check_obs(&self, obs: &[f32]) -> Result<()> {
        if obs.len() != self.obs_len {
            return Err(DrqnError::ShapeMismatch {
                expected: self.obs_len,
                actual: obs.len(),
            });
        }
        Ok(())
    }

    /// Appends `obs` to the acting window, then explores with probability
    /// `epsilon` or takes the greedy action for the window's last timestep.
    pub fn select_action(&mut self, obs: &[f32], epsilon: f64) -> Result<(usize, ActionMode)> {
        self.window.push(obs)?;
        if self.rng.random::<f64>() < epsilon {
            let action = self.rng.random_range(0..self.policy_net.num_actions());
            return Ok((action, ActionMode::Exploring));
        }
        Ok((self.greedy_action()?, ActionMode::Exploiting))
    }

    /// Best action under the live estimator for the current window, run from
    /// a zero hidden state.
    pub fn greedy_action(&self) -> Result<usize> {
        let input = self.window.to_tensor(&self.device)?;
        let (q_values, _) = self.policy_net.forward_fresh(&input)?;
        let last = q_values.i((0, self.window.len() - 1))?;
        Ok(last.argmax(D::Minus1)?.to_scalar::<u32>()? as usize)
    }

    /// Records one environment step, runs a gradient step once learning has
    /// started and syncs the delayed estimator on schedule. Returns the loss
    /// when a gradient step ran.
    pub fn observe(
        &mut self,
        state: Vec<f32>,
        action: usize,
        reward: f32,
        next_state: Option<Vec<f32>>,
    ) -> Result<Option<f32>> {
        self.check_obs(&state)?;
        if let Some(next) = &next_state {
            self.check_obs(next)?;
        }
        if let Some(transition) = self.nstep.push(state, action, reward, next_state) {
            self.memory.push(transition);
        }
        self.steps_done += 1;

        let loss = if self.steps_done >= self.config.learn_start
            && self.memory.len() >= self.config.batch_size
        {
            Some(self.learn()?)
        } else {
            None
        };

        if self.steps_done % self.config.target_update_freq == 0 {
            self.sync_target()?;
        }
        Ok(loss)
    }

    /// Flushes pending n-step transitions and clears the acting window.
    pub fn finish_episode(&mut self) {
        for transition in self.nstep.finish() {
            self.memory.push(transition);
        }
        self.window.reset();
    }

    pub fn sync_target(&mut self) -> Result<()> {
        let drift = self.target_net.parameter_distance(&self.policy_net)?;
        self.target_net.copy_parameters_from(&self.policy_net)?;
        debug!("target network synced at step {} (drift {:.6})", self.steps_done, drift);
        Ok(())
    }

    fn learn(&mut self) -> Result<f32> {
        let sampled = self.memory.sample(self.config.batch_size, &mut self.rng)?;
        let batch = Batch::assemble(&sampled, &self.obs_shape, &self.device)?;
        self.train_on_batch(&batch)
    }

    fn train_on_batch(&mut self, batch: &Batch) -> Result<f32> {
        let loss = compute_loss(
            &self.policy_net,
            &self.target_net,
            batch,
            self.config.bootstrap_discount(),
        )?;
        let mut grads = loss.backward()?;
        let vars = self.policy_net.var_map().all_vars();
        let norm = clip_gradients(&mut grads, &vars, self.config.max_grad_norm)?;
        self.optimizer.step(&grads)?;

        let loss = loss.to_scalar::<f32>()?;
        trace!("step {}: loss {:.6}, grad norm {:.4}", self.steps_done, loss, norm);
        Ok(loss)
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        self.policy_net.save(dir.join("qnet.safetensors"))?;
        self.target_net.save(dir.join("qnet_tgt.safetensors"))?;
        Ok(())
    }

    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        self.policy_net.load(dir.join("qnet.safetensors"))?;
        self.target_net.load(dir.join("qnet_tgt.safetensors"))?;
        Ok(())
    }
}
