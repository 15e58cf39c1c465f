//! Folds consecutive environment steps into n-step transitions.
use std::collections::VecDeque;

use crate::transition::Transition;

struct PendingStep {
    state: Vec<f32>,
    action: usize,
    reward: f32,
}

pub struct NStepAccumulator {
    n_steps: usize,
    discount_factor: f32,
    pending: VecDeque<PendingStep>,
}

impl NStepAccumulator {
    pub fn new(n_steps: usize, discount_factor: f64) -> Self {
        Self {
            n_steps: n_steps.max(1),
            discount_factor: discount_factor as f32,
            pending: VecDeque::with_capacity(n_steps),
        }
    }

    fn discounted_return(&self) -> f32 {
        self.pending
            .iter()
            .take(self.n_steps)
            .enumerate()
            .map(|(i, step)| step.reward * self.discount_factor.powi(i as i32))
            .sum()
    }

    /// Records one step. Once `n_steps` steps are pending, returns the
    /// transition from the oldest one to `next_state`.
    pub fn push(
        &mut self,
        state: Vec<f32>,
        action: usize,
        reward: f32,
        next_state: Option<Vec<f32>>,
    ) -> Option<Transition> {
        self.pending.push_back(PendingStep { state, action, reward });
        if self.pending.len() < self.n_steps {
            return None;
        }
        let ret = self.discounted_return();
        let oldest = self.pending.pop_front()?;
        Some(Transition::new(oldest.state, oldest.action, ret, next_state))
    }

    /// Empties the accumulator at the end of an episode. Every flushed
    /// transition bootstraps from nothing.
    pub fn finish(&mut self) -> Vec<Transition> {
        let mut flushed = Vec::with_capacity(self.pending.len());
        while !self.pending.is_empty() {
            let ret = self.discounted_return();
            if let Some(oldest) = self.pending.pop_front() {
                flushed.push(Transition::new(oldest.state, oldest.action, ret, None));
            }
        }
        flushed
    }
}
