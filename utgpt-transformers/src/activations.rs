//! Activation functions

use serde::{Deserialize, Serialize};
use tch::Tensor;

use crate::module::FallibleModule;
use crate::TransformerError;

/// Activation functions for feed-forward layers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// GELU activation function.
    ///
    /// GELU(x)=x Φ(x)
    ///
    /// where Φ(x) is the CDF for the Gaussian distribution.
    Gelu,

    /// GELU activation function (Google/OpenAI flavor).
    ///
    /// Uses the tanh approximation of Φ(x).
    GeluNew,

    /// ReLU activation function
    ///
    /// ReLU(x)=max(0,x)
    Relu,
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Gelu
    }
}

impl FallibleModule for Activation {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        let output = match self {
            Activation::Gelu => input.f_gelu("none")?,
            Activation::GeluNew => input.f_gelu("tanh")?,
            Activation::Relu => input.f_relu()?,
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use approx::assert_abs_diff_eq;
    use ndarray::{array, ArrayD};
    use tch::Tensor;

    use super::Activation;
    use crate::module::FallibleModule;

    #[test]
    fn gelu_new_returns_correct_values() {
        let activations: ArrayD<f32> = (&Activation::GeluNew
            .forward(&Tensor::from_slice(&[-1f32, -0.5, 0., 0.5, 1.]))
            .unwrap())
            .try_into()
            .unwrap();
        assert_abs_diff_eq!(
            activations,
            array![-0.1588, -0.1543, 0.0000, 0.3457, 0.8412].into_dyn(),
            epsilon = 1e-4
        );
    }

    #[test]
    fn relu_clips_negative_values() {
        let activations: ArrayD<f32> = (&Activation::Relu
            .forward(&Tensor::from_slice(&[-1f32, -0.5, 0., 0.5, 1.]))
            .unwrap())
            .try_into()
            .unwrap();
        assert_abs_diff_eq!(
            activations,
            array![0., 0., 0., 0.5, 1.].into_dyn(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn activations_deserialize_from_snake_case() {
        let activation: Activation = serde_json::from_str("\"gelu_new\"").unwrap();
        assert_eq!(activation, Activation::GeluNew);
    }
}
