//! model_file.rs
//! Serialized policy: layer list with weights, plus optional tuning metadata.
//!
//! ```json
//! {
//!   "in_shape": [null, 27],
//!   "layers": [
//!     { "type": "lstm", "activation": "", "shape": [null, null, 512],
//!       "weights": [kernel[in][4H], recurrent[H][4H], bias[4H]] },
//!     { "type": "dense", "activation": "elu", "shape": [null, 512],
//!       "weights": [kernel[in][out], bias[out]] },
//!     ...
//!   ],
//!   "kp": 7.5,
//!   "default_pose": [0.0, 0.5, ...]
//! }
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning values a model may carry; each overrides the parameter file when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pose: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_lower_limits: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_upper_limits: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_imu: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_history: Option<usize>,
}

/// A weight tensor as stored in the file: either a matrix (rows) or a vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightTensor {
    Matrix(Vec<Vec<f32>>),
    Vector(Vec<f32>),
}

impl WeightTensor {
    pub fn as_matrix(&self) -> Option<&[Vec<f32>]> {
        match self {
            WeightTensor::Matrix(rows) => Some(rows),
            WeightTensor::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            WeightTensor::Vector(values) => Some(values),
            WeightTensor::Matrix(rows) if rows.is_empty() => Some(&[]),
            WeightTensor::Matrix(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub activation: String,
    #[serde(default)]
    pub shape: Vec<Option<usize>>,
    #[serde(default)]
    pub weights: Vec<WeightTensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    #[serde(default)]
    pub in_shape: Vec<Option<usize>>,
    pub layers: Vec<LayerDescription>,
    #[serde(flatten)]
    pub metadata: ModelMetadata,
}

impl ModelDescription {
    pub fn from_json_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::ModelFormat {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, path)
    }

    /// Declared input width: the last entry of `in_shape`.
    pub fn input_width(&self) -> Option<usize> {
        self.in_shape.last().copied().flatten()
    }
}

/// Row-major copy of a `[rows][cols]` matrix, checking every row length.
pub(crate) fn flatten_matrix(
    matrix: &[Vec<f32>],
    rows: usize,
    cols: usize,
    what: &str,
) -> Result<Box<[f32]>, String> {
    if matrix.len() != rows {
        return Err(format!("{} has {} rows, expected {}", what, matrix.len(), rows));
    }
    let mut flat = Vec::with_capacity(rows * cols);
    for (r, row) in matrix.iter().enumerate() {
        if row.len() != cols {
            return Err(format!(
                "{} row {} has {} columns, expected {}",
                what,
                r,
                row.len(),
                cols
            ));
        }
        flat.extend_from_slice(row);
    }
    Ok(flat.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layers_and_metadata() {
        let text = r#"{
            "in_shape": [null, 27],
            "layers": [
                {"type": "dense", "activation": "elu", "shape": [null, 2],
                 "weights": [[[0.5, 1.0]], [0.0, 0.25]]}
            ],
            "kp": 4.0,
            "use_imu": false,
            "default_pose": [0, 0, 0, 0, 0, 0],
            "unrelated": "ignored"
        }"#;
        let desc = ModelDescription::from_json_str(text, Path::new("m.json")).unwrap();
        assert_eq!(desc.input_width(), Some(27));
        assert_eq!(desc.layers[0].kind, "dense");
        assert_eq!(desc.layers[0].weights[0].as_matrix().unwrap()[0], vec![0.5, 1.0]);
        assert_eq!(desc.layers[0].weights[1].as_vector().unwrap(), &[0.0, 0.25]);
        assert_eq!(desc.metadata.kp, Some(4.0));
        assert_eq!(desc.metadata.use_imu, Some(false));
        assert_eq!(desc.metadata.default_pose.as_ref().map(Vec::len), Some(6));
        assert_eq!(desc.metadata.kd, None);
    }

    #[test]
    fn malformed_json_names_the_file() {
        let err = ModelDescription::from_json_str("{", Path::new("broken.json")).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ModelDescription::from_path(Path::new("/nonexistent/policy.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let ragged = vec![vec![1.0, 2.0], vec![3.0]];
        let err = flatten_matrix(&ragged, 2, 2, "kernel").unwrap_err();
        assert!(err.contains("row 1"));
        let flat = flatten_matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2, 2, "kernel").unwrap();
        assert_eq!(&*flat, &[1.0, 2.0, 3.0, 4.0]);
    }
}
