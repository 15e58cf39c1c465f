//! Optimisers for the live estimator.
use candle_core::{Tensor, Var, backprop::GradStore};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum OptimizerConfig {
    AdamW { lr: f64, weight_decay: f64 },
    Adam { lr: f64 },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 1e-4 }
    }
}

impl OptimizerConfig {
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        let optimizer = match *self {
            Self::AdamW { lr, weight_decay } => Optimizer::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    weight_decay,
                    ..Default::default()
                },
            )?),
            Self::Adam { lr } => Optimizer::Adam(Adam::new(
                vars,
                ParamsAdam {
                    lr,
                    ..Default::default()
                },
            )?),
        };
        Ok(optimizer)
    }
}

pub enum Optimizer {
    AdamW(AdamW),
    Adam(Adam),
}

impl Optimizer {
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt) => opt.step(grads)?,
            Self::Adam(opt) => opt.step(grads)?,
        }
        Ok(())
    }
}

/// Rescales the gradients of `vars` so that their joint L2 norm does not
/// exceed `max_norm`. Returns the norm measured before rescaling.
pub fn clip_gradients(grads: &mut GradStore, vars: &[Var], max_norm: f32) -> Result<f32> {
    let tracked: Vec<(&Var, Tensor)> = vars
        .iter()
        .filter_map(|var| grads.get(var.as_tensor()).map(|g| (var, g.clone())))
        .collect();
    let norm = tracked
        .iter()
        .map(|(_, g)| g.sqr()?.sum_all()?.to_scalar::<f32>())
        .sum::<candle_core::Result<f32>>()?
        .sqrt();

    if norm > max_norm {
        let scale = max_norm / norm;
        for (var, g) in tracked {
            grads.insert(var.as_tensor(), (g * scale as f64)?);
        }
        trace!("gradient norm {:.4} clipped by factor {:.4}", norm, scale);
    }
    Ok(norm)
}
