use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder, linear};

use crate::error::Result;

/// Feed-forward feature extractor applied to every observation before the
/// recurrent cell. Every layer, the last one included, is followed by a ReLU.
/// A topology with a single width has no layers and passes input through.
#[derive(Debug, Clone)]
pub struct MultiLayerPerceptron {
    layers: Vec<Linear>,
    topology: Vec<usize>,
}

impl MultiLayerPerceptron {
    /// `topology` lists the input width followed by every layer's output width.
    pub fn new(topology: &[usize], vb: VarBuilder) -> Result<Self> {
        let mut layers: Vec<Linear> = Vec::with_capacity(topology.len().saturating_sub(1));
        for (i, dims) in topology.windows(2).enumerate() {
            layers.push(linear(dims[0], dims[1], vb.pp(i))?);
        }
        Ok(Self {
            layers,
            topology: topology.to_vec(),
        })
    }

    pub fn output_dim(&self) -> usize {
        self.topology.last().copied().unwrap_or(0)
    }
}

impl Module for MultiLayerPerceptron {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = xs.clone();
        for layer in self.layers.iter() {
            x = layer.forward(&x)?.relu()?;
        }
        Ok(x)
    }
}
