use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::{
    agent::DrqnAgent, cartpole::MaskedCartPole, config::DrqnConfig, device::DEVICE,
    environment::Environment, trainer::Trainer,
};

mod agent;
mod batch;
mod cartpole;
mod config;
mod device;
mod environment;
mod error;
mod loss;
mod memory;
mod mlp;
mod network;
mod nstep;
mod optimizer;
mod telemetry;
mod trainer;
mod transition;
mod window;

/// Train a recurrent Q-network on CartPole with the velocities hidden
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML run configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the run's telemetry and checkpoint directory
    #[arg(long, default_value = "drqn")]
    run_id: String,

    /// Directory holding one subdirectory per run
    #[arg(short, long, default_value = "runs")]
    output_dir: PathBuf,

    /// Overrides max_frames
    #[arg(long)]
    max_frames: Option<usize>,

    /// Overrides hidden_size
    #[arg(long)]
    hidden_size: Option<usize>,

    /// Overrides seed
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding `qnet.safetensors` and `qnet_tgt.safetensors` to
    /// start from
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Write the default configuration to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<DrqnConfig> {
    let mut config = match &args.config {
        Some(path) => DrqnConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DrqnConfig::default(),
    };
    if let Some(max_frames) = args.max_frames {
        config.max_frames = max_frames;
    }
    if let Some(hidden_size) = args.hidden_size {
        config.hidden_size = hidden_size;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        DrqnConfig::default().save(path)?;
        info!("default configuration written to {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;
    info!(
        "run {}: {} frames, replay {} x seq {}, batch {}, hidden {}, gamma {}, n-step {}, seed {}",
        args.run_id,
        config.max_frames,
        config.replay_capacity,
        config.sequence_length,
        config.batch_size,
        config.hidden_size,
        config.discount_factor,
        config.n_steps,
        config.seed,
    );

    let mut env = MaskedCartPole::new(config.seed);
    let mut agent = DrqnAgent::new(&config, env.observation_shape(), env.num_actions(), &DEVICE)
        .context("failed to build agent")?;
    if let Some(dir) = &args.resume {
        agent
            .load(dir)
            .with_context(|| format!("failed to load checkpoints from {}", dir.display()))?;
        info!("resumed networks from {}", dir.display());
    }

    let run_dir = args.output_dir.join(&args.run_id);
    fs::create_dir_all(&run_dir)?;
    config.save(run_dir.join("config.yaml"))?;

    let mut trainer = Trainer::new(&config, &args.run_id, &args.output_dir);
    let summary = trainer.run(&mut env, &mut agent).context("training failed")?;
    let telemetry = trainer.telemetry();
    let best = telemetry.episode_rewards().iter().copied().fold(0f32, f32::max);
    info!(
        "finished {} frames over {} episodes, best reward {:.1}, mean of last 10: {:.2}, \
         final loss {:?}",
        summary.frames,
        summary.episodes,
        best,
        summary.mean_recent_reward.unwrap_or(0.0),
        telemetry.losses().last(),
    );
    info!("results archived in {}", summary.archive_dir.display());
    Ok(())
}
