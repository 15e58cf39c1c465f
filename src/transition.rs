/// One environment step as stored in replay memory.
///
/// `next_state` is `None` when the step ended its episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_state: Option<Vec<f32>>,
}

impl Transition {
    pub fn new(state: Vec<f32>, action: usize, reward: f32, next_state: Option<Vec<f32>>) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
        }
    }

    /// Padding placed in front of sequences cut short by an episode start or
    /// by the beginning of the store.
    pub fn zeroed(obs_len: usize) -> Self {
        Self {
            state: vec![0.0; obs_len],
            action: 0,
            reward: 0.0,
            next_state: Some(vec![0.0; obs_len]),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_state.is_none()
    }
}
