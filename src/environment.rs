/// Result of one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Steps taken in the current episode, this one included.
    pub episode_step: usize,
    /// The episode hit its step cap rather than a terminal state.
    pub truncated: bool,
}

/// An episodic environment with fixed-shape observations and a discrete
/// action space.
pub trait Environment {
    fn observation_shape(&self) -> &[usize];

    fn num_actions(&self) -> usize;

    fn reset(&mut self) -> Vec<f32>;

    fn step(&mut self, action: usize) -> Step;
}
