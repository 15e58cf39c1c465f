//! Turns flat sampled sequences into `(batch, time, ...)` tensors.
use candle_core::{Device, Tensor};

use crate::{
    error::{DrqnError, Result},
    memory::SampledSequences,
};

pub struct Batch {
    /// `(batch, time, *obs_shape)`
    pub states: Tensor,
    /// `(batch, time, 1)`, u32
    pub actions: Tensor,
    /// `(batch, time)`
    pub rewards: Tensor,
    /// Per sequence: whether its anchor has a next observation.
    pub non_final_mask: Vec<bool>,
    /// `(n_non_final, time, *obs_shape)`: each non-final sequence shifted one
    /// step forward with the anchor's next observation appended. `None` when
    /// every sequence in the batch ends on a terminal transition.
    pub non_final_next_states: Option<Tensor>,
    pub batch_size: usize,
    pub sequence_length: usize,
}

fn check_len(values: &[f32], expected: usize) -> Result<()> {
    if values.len() != expected {
        return Err(DrqnError::ShapeMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}

impl Batch {
    pub fn assemble(
        sampled: &SampledSequences<'_>,
        obs_shape: &[usize],
        device: &Device,
    ) -> Result<Self> {
        let obs_len: usize = obs_shape.iter().product();
        let batch_size = sampled.batch_size();
        let sequence_length = sampled.sequence_length;
        let n = batch_size * sequence_length;

        let mut states = Vec::with_capacity(n * obs_len);
        let mut actions = Vec::with_capacity(n);
        let mut rewards = Vec::with_capacity(n);
        for t in &sampled.transitions {
            check_len(&t.state, obs_len)?;
            states.extend_from_slice(&t.state);
            actions.push(t.action as u32);
            rewards.push(t.reward);
        }

        let mut non_final_mask = Vec::with_capacity(batch_size);
        let mut rolled = Vec::new();
        for seq in sampled.sequences() {
            let anchor = &seq[sequence_length - 1];
            match &anchor.next_state {
                Some(next) => {
                    check_len(next, obs_len)?;
                    for t in &seq[1..] {
                        rolled.extend_from_slice(&t.state);
                    }
                    rolled.extend_from_slice(next);
                    non_final_mask.push(true);
                }
                None => non_final_mask.push(false),
            }
        }

        let mut seq_shape = vec![batch_size, sequence_length];
        seq_shape.extend_from_slice(obs_shape);

        let n_non_final = non_final_mask.iter().filter(|&&m| m).count();
        let non_final_next_states = if n_non_final == 0 {
            None
        } else {
            let mut shape = seq_shape.clone();
            shape[0] = n_non_final;
            Some(Tensor::from_vec(rolled, shape, device)?)
        };

        Ok(Self {
            states: Tensor::from_vec(states, seq_shape, device)?,
            actions: Tensor::from_vec(actions, (batch_size, sequence_length, 1), device)?,
            rewards: Tensor::from_vec(rewards, (batch_size, sequence_length), device)?,
            non_final_mask,
            non_final_next_states,
            batch_size,
            sequence_length,
        })
    }

    /// Row indices (u32) of the sequences that have a next observation.
    pub fn non_final_indices(&self, device: &Device) -> Result<Tensor> {
        let indices: Vec<u32> = self
            .non_final_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i as u32))
            .collect();
        let len = indices.len();
        Ok(Tensor::from_vec(indices, len, device)?)
    }
}
