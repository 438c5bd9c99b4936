//! lstm.rs
//! Single-step LSTM cell with persistent hidden and cell state.
//!
//! Gate order in the packed weights is input, forget, candidate, output. All buffers are
//! sized at construction; `forward` does not allocate.

use crate::policy::model_file::flatten_matrix;

#[inline]
fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

#[derive(Debug, Clone)]
pub struct LstmLayer {
    input_dim: usize,
    hidden_dim: usize,
    kernel: Box<[f32]>,    // [input_dim][4 * hidden_dim]
    recurrent: Box<[f32]>, // [hidden_dim][4 * hidden_dim]
    bias: Box<[f32]>,      // [4 * hidden_dim]
    gates: Box<[f32]>,
    hidden: Box<[f32]>,
    cell: Box<[f32]>,
}

impl LstmLayer {
    pub fn zeros(input_dim: usize, hidden_dim: usize) -> Self {
        let gate_width = 4 * hidden_dim;
        Self {
            input_dim,
            hidden_dim,
            kernel: vec![0.0; input_dim * gate_width].into_boxed_slice(),
            recurrent: vec![0.0; hidden_dim * gate_width].into_boxed_slice(),
            bias: vec![0.0; gate_width].into_boxed_slice(),
            gates: vec![0.0; gate_width].into_boxed_slice(),
            hidden: vec![0.0; hidden_dim].into_boxed_slice(),
            cell: vec![0.0; hidden_dim].into_boxed_slice(),
        }
    }

    pub fn from_weights(
        input_dim: usize,
        hidden_dim: usize,
        kernel: &[Vec<f32>],
        recurrent: &[Vec<f32>],
        bias: &[f32],
    ) -> Result<Self, String> {
        let gate_width = 4 * hidden_dim;
        let mut layer = Self::zeros(input_dim, hidden_dim);
        layer.kernel = flatten_matrix(kernel, input_dim, gate_width, "lstm kernel")?;
        layer.recurrent = flatten_matrix(recurrent, hidden_dim, gate_width, "lstm recurrent kernel")?;
        if bias.len() != gate_width {
            return Err(format!("lstm bias has {} entries, expected {}", bias.len(), gate_width));
        }
        layer.bias.copy_from_slice(bias);
        Ok(layer)
    }

    /// Advances the cell by one step and returns the new hidden state.
    pub fn forward(&mut self, input: &[f32]) -> &[f32] {
        debug_assert_eq!(input.len(), self.input_dim);
        let gate_width = 4 * self.hidden_dim;

        self.gates.copy_from_slice(&self.bias);
        for (x, row) in input.iter().zip(self.kernel.chunks_exact(gate_width)) {
            for (gate, w) in self.gates.iter_mut().zip(row) {
                *gate += x * w;
            }
        }
        for (h, row) in self.hidden.iter().zip(self.recurrent.chunks_exact(gate_width)) {
            for (gate, w) in self.gates.iter_mut().zip(row) {
                *gate += h * w;
            }
        }

        let n = self.hidden_dim;
        for unit in 0..n {
            let input_gate = sigmoid(self.gates[unit]);
            let forget_gate = sigmoid(self.gates[n + unit]);
            let candidate = self.gates[2 * n + unit].tanh();
            let output_gate = sigmoid(self.gates[3 * n + unit]);
            let cell = forget_gate * self.cell[unit] + input_gate * candidate;
            self.cell[unit] = cell;
            self.hidden[unit] = output_gate * cell.tanh();
        }
        &self.hidden
    }

    pub fn reset_state(&mut self) {
        self.hidden.fill(0.0);
        self.cell.fill(0.0);
    }

    pub fn cell_state(&self) -> &[f32] {
        &self.cell
    }

    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    pub fn kernel_mut(&mut self) -> &mut [f32] {
        &mut self.kernel
    }

    /// Flat kernel, recurrent kernel and bias, row-major.
    pub fn weights(&self) -> (&[f32], &[f32], &[f32]) {
        (&self.kernel, &self.recurrent, &self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_weights_keep_state_at_zero() {
        let mut lstm = LstmLayer::zeros(3, 4);
        let h = lstm.forward(&[1.0, -2.0, 0.5]).to_vec();
        assert!(h.iter().all(|v| *v == 0.0));
        assert!(lstm.cell_state().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn memory_accumulates_across_steps_and_resets() {
        let mut lstm = LstmLayer::zeros(1, 1);
        // Gates saturated open, candidate pinned at tanh(1).
        lstm.bias_mut().copy_from_slice(&[20.0, 20.0, 1.0, 20.0]);
        let first = lstm.forward(&[0.0])[0];
        let second = lstm.forward(&[0.0])[0];
        assert!(second > first, "{second} <= {first}");
        assert!((lstm.cell_state()[0] - 2.0 * 1.0f32.tanh()).abs() < 1e-4);

        lstm.reset_state();
        let again = lstm.forward(&[0.0])[0];
        assert!((again - first).abs() < 1e-6);
    }

    #[test]
    fn input_drives_gates_through_kernel() {
        let mut lstm = LstmLayer::from_weights(
            1,
            1,
            &[vec![0.0, 0.0, 1.0, 0.0]],
            &[vec![0.0; 4]],
            &[0.0; 4],
        )
        .unwrap();
        // i = f = o = 0.5, g = tanh(x)
        let h = lstm.forward(&[2.0])[0];
        let expected = 0.5 * (0.5 * 2.0f32.tanh()).tanh();
        assert!((h - expected).abs() < 1e-6);
    }

    #[test]
    fn wrong_bias_length_is_rejected() {
        let err = LstmLayer::from_weights(1, 1, &[vec![0.0; 4]], &[vec![0.0; 4]], &[0.0; 3])
            .unwrap_err();
        assert!(err.contains("bias"));
    }
}
