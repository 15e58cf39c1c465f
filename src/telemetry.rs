//! Episode rewards and training losses of one run, archived as CSV files
//! under `<output_dir>/<run_id>/`.
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use polars::{
    frame::DataFrame,
    io::SerWriter,
    prelude::{Column, CsvWriter},
};

use crate::error::Result;

/// Number of most recent episodes averaged in the summary.
pub const RECENT_EPISODES: usize = 10;

pub struct Telemetry {
    run_id: String,
    episode_rewards: Vec<f32>,
    loss_frames: Vec<u32>,
    losses: Vec<f32>,
    frames: usize,
}

fn write_csv(path: &Path, columns: Vec<Column>) -> Result<()> {
    let mut df = DataFrame::new(columns)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

impl Telemetry {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            episode_rewards: Vec::new(),
            loss_frames: Vec::new(),
            losses: Vec::new(),
            frames: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_episode(&mut self, reward: f32) {
        self.episode_rewards.push(reward);
    }

    pub fn record_loss(&mut self, frame: usize, loss: f32) {
        self.loss_frames.push(frame as u32);
        self.losses.push(loss);
    }

    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames;
    }

    pub fn episodes(&self) -> usize {
        self.episode_rewards.len()
    }

    pub fn episode_rewards(&self) -> &[f32] {
        &self.episode_rewards
    }

    pub fn losses(&self) -> &[f32] {
        &self.losses
    }

    /// Mean reward of the last [`RECENT_EPISODES`] episodes, `None` before
    /// the first one finishes.
    pub fn mean_recent_reward(&self) -> Option<f32> {
        if self.episode_rewards.is_empty() {
            return None;
        }
        let skip = self.episode_rewards.len().saturating_sub(RECENT_EPISODES);
        let recent = &self.episode_rewards[skip..];
        Some(recent.iter().sum::<f32>() / recent.len() as f32)
    }

    pub fn archive_dir(&self, output_dir: impl AsRef<Path>) -> PathBuf {
        output_dir.as_ref().join(&self.run_id)
    }

    /// Writes `rewards.csv`, `losses.csv` and `summary.csv`, replacing any
    /// earlier snapshot of the same run. Returns the archive directory.
    pub fn write_archive(&self, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = self.archive_dir(output_dir);
        fs::create_dir_all(&dir)?;

        let episodes: Vec<u32> = (0..self.episode_rewards.len() as u32).collect();
        write_csv(
            &dir.join("rewards.csv"),
            vec![
                Column::new("episode".into(), episodes),
                Column::new("reward".into(), self.episode_rewards.clone()),
            ],
        )?;
        write_csv(
            &dir.join("losses.csv"),
            vec![
                Column::new("frame".into(), self.loss_frames.clone()),
                Column::new("loss".into(), self.losses.clone()),
            ],
        )?;
        write_csv(
            &dir.join("summary.csv"),
            vec![
                Column::new("frames".into(), vec![self.frames as u32]),
                Column::new("episodes".into(), vec![self.episode_rewards.len() as u32]),
                Column::new("mean_reward_last_10".into(), vec![self.mean_recent_reward()]),
            ],
        )?;
        Ok(dir)
    }
}
