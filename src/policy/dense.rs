//! dense.rs
//! Fully-connected layer with an optional ELU activation.

use crate::policy::model_file::flatten_matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Elu,
}

impl Activation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "linear" => Some(Activation::Linear),
            "elu" => Some(Activation::Elu),
            _ => None,
        }
    }

    #[inline]
    fn apply(&self, value: f32) -> f32 {
        match self {
            Activation::Linear => value,
            Activation::Elu if value > 0.0 => value,
            Activation::Elu => value.exp_m1(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DenseLayer {
    input_dim: usize,
    output_dim: usize,
    kernel: Box<[f32]>, // [input_dim][output_dim]
    bias: Box<[f32]>,
    activation: Activation,
    output: Box<[f32]>,
}

impl DenseLayer {
    pub fn zeros(input_dim: usize, output_dim: usize, activation: Activation) -> Self {
        Self {
            input_dim,
            output_dim,
            kernel: vec![0.0; input_dim * output_dim].into_boxed_slice(),
            bias: vec![0.0; output_dim].into_boxed_slice(),
            activation,
            output: vec![0.0; output_dim].into_boxed_slice(),
        }
    }

    pub fn from_weights(
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        kernel: &[Vec<f32>],
        bias: &[f32],
    ) -> Result<Self, String> {
        let mut layer = Self::zeros(input_dim, output_dim, activation);
        layer.kernel = flatten_matrix(kernel, input_dim, output_dim, "dense kernel")?;
        if bias.len() != output_dim {
            return Err(format!("dense bias has {} entries, expected {}", bias.len(), output_dim));
        }
        layer.bias.copy_from_slice(bias);
        Ok(layer)
    }

    pub fn forward(&mut self, input: &[f32]) -> &[f32] {
        debug_assert_eq!(input.len(), self.input_dim);
        self.output.copy_from_slice(&self.bias);
        for (x, row) in input.iter().zip(self.kernel.chunks_exact(self.output_dim)) {
            for (out, w) in self.output.iter_mut().zip(row) {
                *out += x * w;
            }
        }
        let activation = self.activation;
        for out in self.output.iter_mut() {
            *out = activation.apply(*out);
        }
        &self.output
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn set_weight(&mut self, input: usize, output: usize, value: f32) {
        self.kernel[input * self.output_dim + output] = value;
    }

    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    /// Flat kernel (row-major) and bias.
    pub fn weights(&self) -> (&[f32], &[f32]) {
        (&self.kernel, &self.bias)
    }
}
