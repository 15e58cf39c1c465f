use std::collections::VecDeque;

use candle_core::{Device, Tensor};

use crate::error::{DrqnError, Result};

/// The most recent `sequence_length` raw observations seen while acting,
/// oldest first. Zero-filled at the start of every episode.
pub struct ObservationWindow {
    observations: VecDeque<Vec<f32>>,
    obs_shape: Vec<usize>,
    obs_len: usize,
}

impl ObservationWindow {
    pub fn new(sequence_length: usize, obs_shape: &[usize]) -> Self {
        let obs_len = obs_shape.iter().product();
        Self {
            observations: (0..sequence_length).map(|_| vec![0.0; obs_len]).collect(),
            obs_shape: obs_shape.to_vec(),
            obs_len,
        }
    }

    pub fn reset(&mut self) {
        for obs in self.observations.iter_mut() {
            obs.fill(0.0);
        }
    }

    /// Drops the oldest observation and appends `obs`.
    pub fn push(&mut self, obs: &[f32]) -> Result<()> {
        if obs.len() != self.obs_len {
            return Err(DrqnError::ShapeMismatch {
                expected: self.obs_len,
                actual: obs.len(),
            });
        }
        if let Some(mut oldest) = self.observations.pop_front() {
            oldest.copy_from_slice(obs);
            self.observations.push_back(oldest);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// `(1, sequence_length, *obs_shape)`
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = self.observations.iter().flatten().copied().collect();
        let mut shape = vec![1, self.observations.len()];
        shape.extend_from_slice(&self.obs_shape);
        Ok(Tensor::from_vec(data, shape, device)?)
    }
}
