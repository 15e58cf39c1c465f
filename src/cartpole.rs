//! CartPole with the velocity terms hidden from the agent.
//!
//! Only cart position and pole angle are observed, so the agent has to infer
//! velocities from the recent history of observations.
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::environment::{Environment, Step, StepInfo};

const GRAVITY: f32 = 9.8;
const CART_MASS: f32 = 1.0;
const POLE_MASS: f32 = 0.1;
const POLE_LENGTH: f32 = 0.5;
const FORCE_MAG: f32 = 10.0;
const DT: f32 = 0.02;
const X_THRESHOLD: f32 = 2.4;
const THETA_THRESHOLD: f32 = 12.0 * std::f32::consts::PI / 180.0;
const INIT_RANGE: f32 = 0.05;
pub const MAX_EPISODE_STEPS: usize = 500;

const OBS_SHAPE: [usize; 1] = [2];

pub struct MaskedCartPole {
    x: f32,
    x_dot: f32,
    theta: f32,
    theta_dot: f32,
    episode_step: usize,
    max_steps: usize,
    rng: StdRng,
}

impl MaskedCartPole {
    pub fn new(seed: u64) -> Self {
        Self {
            x: 0.0,
            x_dot: 0.0,
            theta: 0.0,
            theta_dot: 0.0,
            episode_step: 0,
            max_steps: MAX_EPISODE_STEPS,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn observe(&self) -> Vec<f32> {
        vec![self.x, self.theta]
    }

    fn is_terminal(&self) -> bool {
        self.x.abs() > X_THRESHOLD || self.theta.abs() > THETA_THRESHOLD
    }
}

impl Environment for MaskedCartPole {
    fn observation_shape(&self) -> &[usize] {
        &OBS_SHAPE
    }

    fn num_actions(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Vec<f32> {
        self.x = self.rng.random_range(-INIT_RANGE..INIT_RANGE);
        self.x_dot = self.rng.random_range(-INIT_RANGE..INIT_RANGE);
        self.theta = self.rng.random_range(-INIT_RANGE..INIT_RANGE);
        self.theta_dot = self.rng.random_range(-INIT_RANGE..INIT_RANGE);
        self.episode_step = 0;
        self.observe()
    }

    fn step(&mut self, action: usize) -> Step {
        let force = if action == 1 { FORCE_MAG } else { -FORCE_MAG };
        let total_mass = CART_MASS + POLE_MASS;
        let pole_mass_length = POLE_MASS * POLE_LENGTH;
        let (sin_theta, cos_theta) = self.theta.sin_cos();

        let temp = (force + pole_mass_length * self.theta_dot * self.theta_dot * sin_theta)
            / total_mass;
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
            / (POLE_LENGTH * (4.0 / 3.0 - POLE_MASS * cos_theta * cos_theta / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        self.x += DT * self.x_dot;
        self.x_dot += DT * x_acc;
        self.theta += DT * self.theta_dot;
        self.theta_dot += DT * theta_acc;
        self.episode_step += 1;

        let terminal = self.is_terminal();
        let truncated = !terminal && self.episode_step >= self.max_steps;
        Step {
            observation: self.observe(),
            reward: 1.0,
            done: terminal || truncated,
            info: StepInfo {
                episode_step: self.episode_step,
                truncated,
            },
        }
    }
}
