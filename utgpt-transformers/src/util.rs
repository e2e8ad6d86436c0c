use std::ops::Deref;

use tch::nn::Init;
use tch::{Device, Kind, Tensor};

use crate::TransformerError;

/// Uniform initialization in *[-0.05, 0.05]*.
///
/// This is the default initialization of Keras embedding layers.
pub const SMALL_UNIFORM: Init = Init::Uniform {
    lo: -0.05,
    up: 0.05,
};

/// Glorot/Xavier uniform initialization.
///
/// Samples from *U(-l, l)* with *l = sqrt(6 / (fan_in + fan_out))*.
pub fn glorot_uniform(fan_in: i64, fan_out: i64) -> Init {
    let limit = (6. / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -limit,
        up: limit,
    }
}

/// He uniform initialization.
///
/// Samples from *U(-l, l)* with *l = sqrt(6 / fan_in)*.
pub fn he_uniform(fan_in: i64) -> Init {
    let limit = (6. / fan_in as f64).sqrt();
    Init::Uniform {
        lo: -limit,
        up: limit,
    }
}

/// Causal mask of attention logits.
///
/// This mask masks logits of future time steps by adding a large
/// negative value (`-10_000`). The mask has shape
/// `[1, 1, seq_len, seq_len]`, so that it broadcasts over the batch
/// and attention heads.
pub struct CausalMask {
    inner: Tensor,
}

impl CausalMask {
    /// Construct a causal mask for sequences of length `seq_len`.
    pub fn new(seq_len: i64, device: Device) -> Result<Self, TransformerError> {
        // Entries above the diagonal are future time steps.
        let future = Tensor::f_ones(&[seq_len, seq_len], (Kind::Float, device))?.f_triu(1)?;
        let logits_mask = future
            .f_mul_scalar(-10_000.)?
            .f_unsqueeze(0)?
            .f_unsqueeze(0)?;

        Ok(CausalMask { inner: logits_mask })
    }
}

impl Deref for CausalMask {
    type Target = Tensor;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
pub mod tests {
    use std::convert::TryInto;

    use approx::assert_abs_diff_eq;
    use ndarray::{array, ArrayD, Axis};
    use tch::nn::Init;
    use tch::Device;

    use super::{glorot_uniform, CausalMask};

    #[test]
    fn causal_mask_masks_future_time_steps() {
        let mask = CausalMask::new(3, Device::Cpu).unwrap();
        assert_eq!(mask.size(), &[1, 1, 3, 3]);

        let mask: ArrayD<f32> = (&*mask).try_into().unwrap();
        assert_abs_diff_eq!(
            mask,
            array![[
                [0., -10_000., -10_000.],
                [0., 0., -10_000.],
                [0., 0., 0.]
            ]]
            .insert_axis(Axis(0))
            .into_dyn(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn glorot_uniform_limit() {
        match glorot_uniform(2, 4) {
            Init::Uniform { lo, up } => {
                assert_abs_diff_eq!(up, 1.0, epsilon = 1e-12);
                assert_abs_diff_eq!(lo, -1.0, epsilon = 1e-12);
            }
            _ => panic!("Glorot initialization should be uniform"),
        }
    }
}
