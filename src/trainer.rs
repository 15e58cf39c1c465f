use std::path::{Path, PathBuf};

use log::info;

use crate::{
    agent::{ActionMode, DrqnAgent},
    config::DrqnConfig,
    environment::Environment,
    error::Result,
    telemetry::Telemetry,
};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub frames: usize,
    pub episodes: usize,
    pub mean_recent_reward: Option<f32>,
    pub archive_dir: PathBuf,
}

/// Drives one agent through `max_frames` environment steps.
pub struct Trainer {
    config: DrqnConfig,
    output_dir: PathBuf,
    telemetry: Telemetry,
}

impl Trainer {
    pub fn new(
        config: &DrqnConfig,
        run_id: impl Into<String>,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            config: config.clone(),
            output_dir: output_dir.as_ref().to_path_buf(),
            telemetry: Telemetry::new(run_id),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn snapshot(&mut self, frame: usize) -> Result<PathBuf> {
        self.telemetry.set_frames(frame);
        let dir = self.telemetry.write_archive(&self.output_dir)?;
        info!(
            "run {}: telemetry snapshot written to {} at frame {}",
            self.telemetry.run_id(),
            dir.display(),
            frame
        );
        Ok(dir)
    }

    pub fn run<E: Environment>(
        &mut self,
        env: &mut E,
        agent: &mut DrqnAgent,
    ) -> Result<TrainingSummary> {
        let mut observation = env.reset();
        let mut episode_reward = 0f32;
        let mut exploit_steps = 0usize;

        for frame in 1..=self.config.max_frames {
            let epsilon = self.config.epsilon.epsilon(frame);
            let (action, mode) = agent.select_action(&observation, epsilon)?;
            if mode == ActionMode::Exploiting {
                exploit_steps += 1;
            }

            let step = env.step(action);
            episode_reward += step.reward;
            let state = std::mem::replace(&mut observation, step.observation);
            let next_state = (!step.done).then(|| observation.clone());

            if let Some(loss) = agent.observe(state, action, step.reward, next_state)? {
                self.telemetry.record_loss(frame, loss);
                if frame % self.config.log_interval == 0 {
                    info!(
                        "[frame {}] loss {:.5}, epsilon {:.3}, replay {}",
                        frame,
                        loss,
                        epsilon,
                        agent.memory().len()
                    );
                }
            }

            if step.done {
                agent.finish_episode();
                self.telemetry.record_episode(episode_reward);
                let ending = if step.info.truncated { "truncated" } else { "terminal" };
                info!(
                    "[frame {}] episode {} reward {:.1} after {} steps ({}), \
                     mean of last 10: {:.2}, greedy steps {}",
                    frame,
                    self.telemetry.episodes(),
                    episode_reward,
                    step.info.episode_step,
                    ending,
                    self.telemetry.mean_recent_reward().unwrap_or(episode_reward),
                    exploit_steps,
                );
                episode_reward = 0.0;
                exploit_steps = 0;
                observation = env.reset();
            }

            if frame % self.config.snapshot_interval == 0 {
                self.snapshot(frame)?;
            }
        }

        let archive_dir = self.snapshot(self.config.max_frames)?;
        agent.save(&archive_dir)?;
        info!("checkpoints saved to {}", archive_dir.display());

        Ok(TrainingSummary {
            frames: self.config.max_frames,
            episodes: self.telemetry.episodes(),
            mean_recent_reward: self.telemetry.mean_recent_reward(),
            archive_dir,
        })
    }
}
