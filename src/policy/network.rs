//! network.rs
//! Recurrent locomotion policy: one LSTM followed by three ELU dense layers and a linear head.
//!
//! The topology is fixed at compile time (`LOCOMOTION_TOPOLOGY`); a model description whose
//! layers disagree with it is rejected at load. Every intermediate buffer lives inside its
//! layer, so `forward` runs without allocating.

use std::path::Path;

use log::info;

use crate::error::ConfigError;
use crate::config::ACTION_SIZE;
use crate::policy::dense::{Activation, DenseLayer};
use crate::policy::lstm::LstmLayer;
use crate::policy::model_file::{LayerDescription, ModelDescription, WeightTensor};

/// Layer widths of the policy network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTopology {
    pub lstm: usize,
    pub dense: [usize; 3],
    pub output: usize,
}

impl NetworkTopology {
    pub const LAYER_COUNT: usize = 5;

    /// Output width of layer `index` (0 is the LSTM, 4 the head).
    pub fn width(&self, index: usize) -> usize {
        match index {
            0 => self.lstm,
            1..=3 => self.dense[index - 1],
            _ => self.output,
        }
    }
}

pub const LOCOMOTION_TOPOLOGY: NetworkTopology = NetworkTopology {
    lstm: 512,
    dense: [512, 256, 128],
    output: ACTION_SIZE,
};

#[derive(Debug, Clone)]
pub struct PolicyModel {
    topology: NetworkTopology,
    input_width: usize,
    lstm: LstmLayer,
    hidden: [DenseLayer; 3],
    head: DenseLayer,
}

impl PolicyModel {
    /// All-zero weights; the network outputs zeros until weights are set.
    pub fn zeros(topology: &NetworkTopology, input_width: usize) -> Self {
        let [w0, w1, w2] = topology.dense;
        Self {
            topology: *topology,
            input_width,
            lstm: LstmLayer::zeros(input_width, topology.lstm),
            hidden: [
                DenseLayer::zeros(topology.lstm, w0, Activation::Elu),
                DenseLayer::zeros(w0, w1, Activation::Elu),
                DenseLayer::zeros(w1, w2, Activation::Elu),
            ],
            head: DenseLayer::zeros(w2, topology.output, Activation::Linear),
        }
    }

    pub fn from_path(
        path: &Path,
        topology: &NetworkTopology,
        input_width: usize,
    ) -> Result<Self, ConfigError> {
        let description = ModelDescription::from_path(path)?;
        Self::from_description(&description, topology, input_width)
    }

    /// Builds the network from a parsed description, checking it layer by layer against
    /// `topology`.
    pub fn from_description(
        description: &ModelDescription,
        topology: &NetworkTopology,
        input_width: usize,
    ) -> Result<Self, ConfigError> {
        match description.input_width() {
            Some(found) if found != input_width => {
                return Err(ConfigError::Topology {
                    location: "in_shape".to_string(),
                    expected: input_width,
                    found,
                });
            }
            Some(_) => {}
            None => return Err(ConfigError::invalid("in_shape", "missing input width")),
        }

        let layers = &description.layers;
        if layers.len() != NetworkTopology::LAYER_COUNT {
            return Err(ConfigError::Topology {
                location: "layer count".to_string(),
                expected: NetworkTopology::LAYER_COUNT,
                found: layers.len(),
            });
        }
        for (index, layer) in layers.iter().enumerate() {
            check_units(index, layer, topology.width(index))?;
        }

        let lstm = lstm_from(&layers[0], input_width, topology.lstm)?;
        let [w0, w1, w2] = topology.dense;
        let hidden = [
            dense_from(1, &layers[1], topology.lstm, w0, Activation::Elu)?,
            dense_from(2, &layers[2], w0, w1, Activation::Elu)?,
            dense_from(3, &layers[3], w1, w2, Activation::Elu)?,
        ];
        let head = dense_from(4, &layers[4], w2, topology.output, Activation::Linear)?;

        info!(
            "Loaded policy: input {} -> lstm {} -> dense {:?} -> {}",
            input_width, topology.lstm, topology.dense, topology.output
        );
        Ok(Self {
            topology: *topology,
            input_width,
            lstm,
            hidden,
            head,
        })
    }

    /// One inference step. Advances the recurrent state.
    pub fn forward(&mut self, input: &[f32]) -> &[f32] {
        let [d0, d1, d2] = &mut self.hidden;
        let x = self.lstm.forward(input);
        let x = d0.forward(x);
        let x = d1.forward(x);
        let x = d2.forward(x);
        self.head.forward(x)
    }

    /// Clears recurrent memory; called on activation.
    pub fn reset_state(&mut self) {
        self.lstm.reset_state();
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.topology.output
    }

    pub fn lstm_mut(&mut self) -> &mut LstmLayer {
        &mut self.lstm
    }

    pub fn hidden_mut(&mut self) -> &mut [DenseLayer; 3] {
        &mut self.hidden
    }

    pub fn head_mut(&mut self) -> &mut DenseLayer {
        &mut self.head
    }

    /// Serializable form of the current weights, in the model file layout.
    pub fn describe(&self) -> ModelDescription {
        let (kernel, recurrent, bias) = self.lstm.weights();
        let gate_width = 4 * self.topology.lstm;
        let mut layers = vec![LayerDescription {
            kind: "lstm".to_string(),
            activation: String::new(),
            shape: vec![None, None, Some(self.topology.lstm)],
            weights: vec![
                WeightTensor::Matrix(rows(kernel, gate_width)),
                WeightTensor::Matrix(rows(recurrent, gate_width)),
                WeightTensor::Vector(bias.to_vec()),
            ],
        }];
        for layer in self.hidden.iter().chain(std::iter::once(&self.head)) {
            let (kernel, bias) = layer.weights();
            layers.push(LayerDescription {
                kind: "dense".to_string(),
                activation: match layer.activation() {
                    Activation::Elu => "elu".to_string(),
                    Activation::Linear => String::new(),
                },
                shape: vec![None, Some(layer.output_dim())],
                weights: vec![
                    WeightTensor::Matrix(rows(kernel, layer.output_dim())),
                    WeightTensor::Vector(bias.to_vec()),
                ],
            });
        }
        ModelDescription {
            in_shape: vec![None, Some(self.input_width)],
            layers,
            metadata: Default::default(),
        }
    }
}

fn rows(flat: &[f32], cols: usize) -> Vec<Vec<f32>> {
    flat.chunks_exact(cols).map(<[f32]>::to_vec).collect()
}

fn check_units(index: usize, layer: &LayerDescription, expected: usize) -> Result<(), ConfigError> {
    match layer.shape.last().copied().flatten() {
        Some(found) if found != expected => Err(ConfigError::Topology {
            location: format!("layer {} units", index),
            expected,
            found,
        }),
        _ => Ok(()),
    }
}

fn layer_error(index: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::Layer {
        index,
        reason: reason.into(),
    }
}

fn matrix<'a>(index: usize, layer: &'a LayerDescription, slot: usize) -> Result<&'a [Vec<f32>], ConfigError> {
    layer
        .weights
        .get(slot)
        .and_then(WeightTensor::as_matrix)
        .ok_or_else(|| layer_error(index, format!("weights[{}] must be a matrix", slot)))
}

fn vector<'a>(index: usize, layer: &'a LayerDescription, slot: usize) -> Result<&'a [f32], ConfigError> {
    layer
        .weights
        .get(slot)
        .and_then(WeightTensor::as_vector)
        .ok_or_else(|| layer_error(index, format!("weights[{}] must be a vector", slot)))
}

fn lstm_from(layer: &LayerDescription, input_dim: usize, hidden_dim: usize) -> Result<LstmLayer, ConfigError> {
    if layer.kind != "lstm" {
        return Err(layer_error(0, format!("expected lstm, found {}", layer.kind)));
    }
    if layer.weights.len() != 3 {
        return Err(layer_error(
            0,
            format!("expected 3 weight tensors, found {}", layer.weights.len()),
        ));
    }
    LstmLayer::from_weights(
        input_dim,
        hidden_dim,
        matrix(0, layer, 0)?,
        matrix(0, layer, 1)?,
        vector(0, layer, 2)?,
    )
    .map_err(|reason| layer_error(0, reason))
}

fn dense_from(
    index: usize,
    layer: &LayerDescription,
    input_dim: usize,
    output_dim: usize,
    activation: Activation,
) -> Result<DenseLayer, ConfigError> {
    if layer.kind != "dense" {
        return Err(layer_error(index, format!("expected dense, found {}", layer.kind)));
    }
    match Activation::from_name(&layer.activation) {
        Some(found) if found == activation => {}
        _ => {
            return Err(layer_error(
                index,
                format!("unexpected activation '{}'", layer.activation),
            ));
        }
    }
    if layer.weights.len() != 2 {
        return Err(layer_error(
            index,
            format!("expected 2 weight tensors, found {}", layer.weights.len()),
        ));
    }
    DenseLayer::from_weights(
        input_dim,
        output_dim,
        activation,
        matrix(index, layer, 0)?,
        vector(index, layer, 1)?,
    )
    .map_err(|reason| layer_error(index, reason))
}
