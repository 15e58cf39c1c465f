//! Bootstrapped targets and the masked Huber loss for one batch.
use candle_core::{D, DType, Device, Tensor};

use crate::{batch::Batch, error::Result, network::RecurrentEstimator};

/// Elementwise Huber loss with threshold 1.
pub fn huber(diff: &Tensor) -> Result<Tensor> {
    let abs = diff.abs()?;
    let quadratic = (diff.sqr()? * 0.5)?;
    let linear = (&abs - 0.5)?;
    Ok(abs.lt(1f32)?.where_cond(&quadratic, &linear)?)
}

/// `(1, sequence_length)` with zeros on the first half of the timesteps and
/// ones on the rest.
pub fn sequence_mask(sequence_length: usize, device: &Device) -> Result<Tensor> {
    let split = sequence_length / 2;
    let mask: Vec<f32> = (0..sequence_length)
        .map(|t| if t < split { 0.0 } else { 1.0 })
        .collect();
    Ok(Tensor::from_vec(mask, (1, sequence_length), device)?)
}

/// Values of the taken actions under the live estimator, `(batch, time)`.
pub fn current_q_values<E: RecurrentEstimator>(live: &E, batch: &Batch) -> Result<Tensor> {
    let (q_values, _) = live.forward_fresh(&batch.states)?;
    Ok(q_values.gather(&batch.actions, D::Minus1)?.squeeze(D::Minus1)?)
}

/// `reward + bootstrap_discount * max_a Q_target(rolled next states)`, with
/// the bootstrap term left at zero for sequences that end an episode.
pub fn bootstrapped_targets<E: RecurrentEstimator>(
    target: &E,
    batch: &Batch,
    bootstrap_discount: f64,
) -> Result<Tensor> {
    let device = batch.rewards.device();
    let mut max_next = Tensor::zeros(
        (batch.batch_size, batch.sequence_length),
        DType::F32,
        device,
    )?;
    if let Some(next_states) = &batch.non_final_next_states {
        let (next_q, _) = target.forward_fresh(next_states)?;
        let best = next_q.max(D::Minus1)?;
        max_next = max_next.index_add(&batch.non_final_indices(device)?, &best, 0)?;
    }
    let targets = (&batch.rewards + (max_next * bootstrap_discount)?)?;
    Ok(targets.detach())
}

/// Huber loss per `(batch, time)` with the first half of every sequence zeroed.
pub fn masked_huber(targets: &Tensor, current: &Tensor, sequence_length: usize) -> Result<Tensor> {
    let mask = sequence_mask(sequence_length, current.device())?;
    Ok(huber(&(targets - current)?)?.broadcast_mul(&mask)?)
}

/// Scalar training loss: mean of the masked per-timestep losses over the
/// whole `(batch, time)` grid.
pub fn compute_loss<E: RecurrentEstimator>(
    live: &E,
    target: &E,
    batch: &Batch,
    bootstrap_discount: f64,
) -> Result<Tensor> {
    let current = current_q_values(live, batch)?;
    let targets = bootstrapped_targets(target, batch, bootstrap_discount)?;
    Ok(masked_huber(&targets, &current, batch.sequence_length)?.mean_all()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DrqnConfig,
        memory::{RecurrentReplayMemory, SampledSequences},
        network::DrqnNetwork,
        transition::Transition,
    };
    use candle_core::IndexOp;
    use rand::SeedableRng;

    const SEQ: usize = 4;

    fn network() -> Result<DrqnNetwork> {
        let config = DrqnConfig {
            hidden_size: 6,
            encoder_layers: vec![8],
            ..Default::default()
        };
        DrqnNetwork::new(&[3], 2, &config, &Device::Cpu)
    }

    /// Two episodes of lengths 3 and 4 with rewards equal to the store index.
    fn memory() -> RecurrentReplayMemory {
        let mut memory = RecurrentReplayMemory::new(32, SEQ, 3);
        let ends = [2, 6];
        for i in 0..7 {
            let obs = vec![i as f32 * 0.1, 1.0, -(i as f32) * 0.2];
            let next = (!ends.contains(&i)).then(|| vec![(i + 1) as f32 * 0.1, 1.0, 0.0]);
            memory.push(Transition::new(obs, i % 2, i as f32, next));
        }
        memory
    }

    fn batch(memory: &RecurrentReplayMemory, anchors: &[usize]) -> Result<Batch> {
        let sampled = SampledSequences {
            transitions: anchors
                .iter()
                .flat_map(|&a| memory.sequence_ending_at(a).unwrap())
                .collect(),
            anchors: anchors.to_vec(),
            sequence_length: SEQ,
        };
        Batch::assemble(&sampled, &[3], &Device::Cpu)
    }

    #[test]
    fn huber_is_quadratic_then_linear() -> anyhow::Result<()> {
        let diff = Tensor::new(&[-2f32, -0.5, 0.0, 0.5, 2.0], &Device::Cpu)?;
        assert_eq!(huber(&diff)?.to_vec1::<f32>()?, vec![1.5, 0.125, 0.0, 0.125, 1.5]);
        Ok(())
    }

    #[test]
    fn mask_covers_first_half() -> anyhow::Result<()> {
        let mask = |l| -> anyhow::Result<Vec<f32>> {
            Ok(sequence_mask(l, &Device::Cpu)?.squeeze(0)?.to_vec1::<f32>()?)
        };
        assert_eq!(mask(8)?, vec![0., 0., 0., 0., 1., 1., 1., 1.]);
        assert_eq!(mask(3)?, vec![0., 1., 1.]);
        assert_eq!(mask(1)?, vec![1.]);
        Ok(())
    }

    #[test]
    fn masking_zeroes_early_steps_and_keeps_late_ones() -> anyhow::Result<()> {
        let targets = Tensor::new(&[[3f32, -2.0, 0.25, 5.0], [1.0, 1.0, -4.0, 0.5]], &Device::Cpu)?;
        let current = Tensor::zeros((2, 4), DType::F32, &Device::Cpu)?;
        let masked = masked_huber(&targets, &current, 4)?.to_vec2::<f32>()?;
        let raw = huber(&targets)?.to_vec2::<f32>()?;
        for (masked_row, raw_row) in masked.iter().zip(&raw) {
            assert_eq!(&masked_row[..2], &[0.0, 0.0]);
            assert_eq!(&masked_row[2..], &raw_row[2..]);
        }
        Ok(())
    }

    #[test]
    fn all_terminal_batch_targets_equal_rewards() -> anyhow::Result<()> {
        let memory = memory();
        let batch = batch(&memory, &[2, 6])?;
        assert!(batch.non_final_next_states.is_none());

        let targets = bootstrapped_targets(&network()?, &batch, 0.99)?;
        assert_eq!(targets.to_vec2::<f32>()?, batch.rewards.to_vec2::<f32>()?);

        let live = network()?;
        let loss = compute_loss(&live, &network()?, &batch, 0.99)?;
        assert!(loss.to_scalar::<f32>()?.is_finite());
        Ok(())
    }

    #[test]
    fn non_final_rows_bootstrap_from_rolled_next_states() -> anyhow::Result<()> {
        let memory = memory();
        let batch = batch(&memory, &[4, 2, 1])?;
        assert_eq!(batch.non_final_mask, vec![true, false, true]);

        let target = network()?;
        let gamma = 0.9;
        let targets = bootstrapped_targets(&target, &batch, gamma)?;

        let (next_q, _) = target.forward_fresh(batch.non_final_next_states.as_ref().unwrap())?;
        let best = next_q.max(D::Minus1)?;
        let rewards = batch.rewards.to_vec2::<f32>()?;
        let targets = targets.to_vec2::<f32>()?;

        for (row, next_row) in [(0usize, 0usize), (2, 1)] {
            let best_row = best.i(next_row)?.to_vec1::<f32>()?;
            for t in 0..SEQ {
                let expected = rewards[row][t] + gamma as f32 * best_row[t];
                assert!((targets[row][t] - expected).abs() < 1e-5);
            }
        }
        assert_eq!(targets[1], rewards[1]);
        Ok(())
    }

    #[test]
    fn loss_runs_on_sequences_from_a_small_store() -> anyhow::Result<()> {
        let mut memory = RecurrentReplayMemory::new(5, 3, 1);
        for i in 0..5 {
            let next = (i != 2).then(|| vec![(i + 1) as f32]);
            memory.push(Transition::new(vec![i as f32], i % 2, 1.0, next));
        }
        let config = DrqnConfig {
            hidden_size: 4,
            encoder_layers: vec![4],
            ..Default::default()
        };
        let live = DrqnNetwork::new(&[1], 2, &config, &Device::Cpu)?;
        let target = DrqnNetwork::new(&[1], 2, &config, &Device::Cpu)?;
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let sampled = memory.sample(5, &mut rng)?;
        let batch = Batch::assemble(&sampled, &[1], &Device::Cpu)?;

        assert_eq!(current_q_values(&live, &batch)?.dims(), &[5, 3]);
        assert_eq!(bootstrapped_targets(&target, &batch, 0.99)?.dims(), &[5, 3]);
        let loss = compute_loss(&live, &target, &batch, 0.99)?;
        assert!(loss.to_scalar::<f32>()?.is_finite());
        Ok(())
    }

    #[test]
    fn current_values_follow_taken_actions() -> anyhow::Result<()> {
        let memory = memory();
        let batch = batch(&memory, &[5, 6])?;
        let live = network()?;
        let current = current_q_values(&live, &batch)?;
        assert_eq!(current.dims(), &[2, SEQ]);

        let (q, _) = live.forward_fresh(&batch.states)?;
        let q = q.to_vec3::<f32>()?;
        let actions = batch.actions.squeeze(2)?.to_vec2::<u32>()?;
        let current = current.to_vec2::<f32>()?;
        for b in 0..2 {
            for t in 0..SEQ {
                assert_eq!(current[b][t], q[b][t][actions[b][t] as usize]);
            }
        }
        Ok(())
    }
}
