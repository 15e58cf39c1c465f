//! Replay memory for recurrent training.
//!
//! Transitions are stored flat, in the order they happened. Sequences are
//! cut out of the flat store at sampling time: each one ends at a randomly
//! drawn anchor, never reaches back past the end of a previous episode and is
//! zero-padded at the front up to `sequence_length`.
use std::{borrow::Cow, collections::VecDeque};

use rand::{Rng, seq::index};

use crate::{
    config::DrqnConfig,
    error::{DrqnError, Result},
    transition::Transition,
};

pub struct RecurrentReplayMemory {
    transitions: VecDeque<Transition>,
    capacity: usize,
    sequence_length: usize,
    obs_len: usize,
}

/// `batch_size` sequences laid end to end; position `i` belongs to sequence
/// `i / sequence_length`.
pub struct SampledSequences<'a> {
    pub transitions: Vec<Cow<'a, Transition>>,
    pub anchors: Vec<usize>,
    pub sequence_length: usize,
}

impl<'a> SampledSequences<'a> {
    pub fn batch_size(&self) -> usize {
        self.anchors.len()
    }

    pub fn sequences(&self) -> impl Iterator<Item = &[Cow<'a, Transition>]> {
        self.transitions.chunks_exact(self.sequence_length)
    }
}

impl RecurrentReplayMemory {
    pub fn new(capacity: usize, sequence_length: usize, obs_len: usize) -> Self {
        Self {
            transitions: VecDeque::with_capacity(capacity + 1),
            capacity,
            sequence_length,
            obs_len,
        }
    }

    pub fn from_config(config: &DrqnConfig, obs_len: usize) -> Self {
        Self::new(config.replay_capacity, config.sequence_length, obs_len)
    }

    /// Appends `transition`, evicting the oldest one once the store is over capacity.
    pub fn push(&mut self, transition: Transition) {
        self.transitions.push_back(transition);
        if self.transitions.len() > self.capacity {
            self.transitions.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// First store index of the sequence ending at `anchor`.
    ///
    /// The window `[anchor - sequence_length + 1, anchor]` is clipped to the
    /// store, then cut to start right after the last terminal transition
    /// found before the anchor. The terminal itself belongs to the previous
    /// episode and is left out.
    fn window_start(&self, anchor: usize) -> usize {
        let start = (anchor + 1).saturating_sub(self.sequence_length);
        (start..anchor)
            .rev()
            .find(|&i| self.transitions[i].is_terminal())
            .map_or(start, |boundary| boundary + 1)
    }

    /// The padded sequence of exactly `sequence_length` transitions ending at
    /// `anchor`, or `None` if `anchor` is not a stored index.
    pub fn sequence_ending_at(&self, anchor: usize) -> Option<Vec<Cow<'_, Transition>>> {
        if anchor >= self.transitions.len() {
            return None;
        }
        let start = self.window_start(anchor);
        let n_real = anchor + 1 - start;
        let mut sequence = Vec::with_capacity(self.sequence_length);
        sequence.extend(
            (n_real..self.sequence_length).map(|_| Cow::Owned(Transition::zeroed(self.obs_len))),
        );
        sequence.extend(self.transitions.range(start..=anchor).map(Cow::Borrowed));
        Some(sequence)
    }

    /// Draws `batch_size` distinct anchors uniformly and returns their
    /// sequences flattened in anchor order.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<SampledSequences<'_>> {
        if batch_size > self.transitions.len() {
            return Err(DrqnError::InsufficientTransitions {
                requested: batch_size,
                available: self.transitions.len(),
            });
        }

        let anchors = index::sample(rng, self.transitions.len(), batch_size).into_vec();
        let mut transitions = Vec::with_capacity(batch_size * self.sequence_length);
        for &anchor in &anchors {
            if let Some(sequence) = self.sequence_ending_at(anchor) {
                transitions.extend(sequence);
            }
        }

        Ok(SampledSequences {
            transitions,
            anchors,
            sequence_length: self.sequence_length,
        })
    }
}
