//! Basic neural network modules.
//!
//! These are modules that are not provided by the Torch binding, or where
//! different behavior is required from the modules.

use std::borrow::Borrow;

use tch::nn::{Init, Linear, Path};
use tch::Tensor;

use crate::activations::Activation;
use crate::module::{FallibleModule, FallibleModuleT};
use crate::util::{glorot_uniform, he_uniform};
use crate::TransformerError;

/// Causal 1-D convolution over the time steps of a sequence.
///
/// The input is left-padded with `kernel_size - 1` zeros, so that the
/// output at time step *t* only depends on time steps *≤ t*. The layer
/// consumes and produces tensors in the `[batch_size, seq_len, features]`
/// layout.
#[derive(Debug)]
pub struct CausalConv1D {
    activation: Option<Activation>,
    kernel_size: i64,
    ws: Tensor,
    bs: Tensor,
}

impl CausalConv1D {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        in_features: i64,
        out_features: i64,
        kernel_size: i64,
        activation: Option<Activation>,
    ) -> Result<Self, TransformerError> {
        if kernel_size <= 0 {
            return Err(TransformerError::IncorrectConvolutionWidth { width: kernel_size });
        }

        let vs = vs.borrow();

        let ws = vs.f_var(
            "weight",
            &[out_features, in_features, kernel_size],
            he_uniform(in_features * kernel_size),
        )?;
        let bs = vs.f_var("bias", &[out_features], Init::Const(0.))?;

        Ok(CausalConv1D {
            activation,
            kernel_size,
            ws,
            bs,
        })
    }
}

impl FallibleModule for CausalConv1D {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        let (batch_size, _, features) = input.size3()?;

        // Convolution expects [batch_size, features, seq_len].
        let input = input.f_permute(&[0, 2, 1])?;

        let padding = Tensor::f_zeros(
            &[batch_size, features, self.kernel_size - 1],
            (input.kind(), input.device()),
        )?;
        let padded = Tensor::f_cat(&[&padding, &input], 2)?;

        let mut output = padded
            .f_conv1d(&self.ws, Some(&self.bs), &[1], &[0], &[1], 1)?
            .f_permute(&[0, 2, 1])?;

        if let Some(activation) = self.activation {
            output = activation.forward(&output)?;
        }

        Ok(output)
    }
}

/// Dropout layer.
///
/// This layer zeros out random elements of a tensor with probability
/// *p*. Dropout is a form of regularization and prevents
/// co-adaptation of neurons.
#[derive(Debug)]
pub struct Dropout {
    p: f64,
}

impl Dropout {
    /// Drop out elements with probability *p*.
    pub fn new(p: f64) -> Self {
        Dropout { p }
    }
}

impl FallibleModuleT for Dropout {
    type Error = TransformerError;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error> {
        if self.p > 0. {
            Ok(input.f_dropout(self.p, train)?)
        } else {
            Ok(input.shallow_clone())
        }
    }
}

/// Embedding lookup layer.
#[derive(Debug)]
pub struct Embedding(pub Tensor);

impl Embedding {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        name: &str,
        num_embeddings: i64,
        embedding_dim: i64,
        init: Init,
    ) -> Result<Self, TransformerError> {
        Ok(Embedding(vs.borrow().f_var(
            name,
            &[num_embeddings, embedding_dim],
            init,
        )?))
    }
}

impl FallibleModule for Embedding {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        Ok(Tensor::f_embedding(&self.0, input, -1, false, false)?)
    }
}

/// Layer that applies layer normalization.
#[derive(Debug)]
pub struct LayerNorm {
    eps: f64,
    normalized_shape: Vec<i64>,

    weight: Option<Tensor>,
    bias: Option<Tensor>,
}

impl LayerNorm {
    /// Construct a layer normalization layer.
    ///
    /// The mean and standard deviation are computed over the last
    /// number of dimensions with the shape defined by
    /// `normalized_shape`. If `elementwise_affine` is `True`, a
    /// learnable affine transformation of the shape
    /// `normalized_shape` is added after normalization.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        normalized_shape: impl Into<Vec<i64>>,
        eps: f64,
        elementwise_affine: bool,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        let normalized_shape = normalized_shape.into();

        let (weight, bias) = if elementwise_affine {
            (
                Some(vs.f_var("weight", &normalized_shape, Init::Const(1.))?),
                Some(vs.f_var("bias", &normalized_shape, Init::Const(0.))?),
            )
        } else {
            (None, None)
        };

        Ok(LayerNorm {
            eps,
            normalized_shape,

            weight,
            bias,
        })
    }
}

impl FallibleModule for LayerNorm {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        Ok(input.f_layer_norm(
            self.normalized_shape.as_slice(),
            self.weight.as_ref(),
            self.bias.as_ref(),
            self.eps,
            false,
        )?)
    }
}

/// Construct an affine layer with Glorot-initialized weights.
///
/// The bias is initialized to zero when `bias` is `true`.
pub fn dense<'a>(
    vs: impl Borrow<Path<'a>>,
    in_features: i64,
    out_features: i64,
    bias: bool,
) -> Result<Linear, TransformerError> {
    let vs = vs.borrow();

    let ws = vs.f_var(
        "weight",
        &[out_features, in_features],
        glorot_uniform(in_features, out_features),
    )?;
    let bs = if bias {
        Some(vs.f_var("bias", &[out_features], Init::Const(0.))?)
    } else {
        None
    };

    Ok(Linear { ws, bs })
}
