//! Causal self-attention.

use std::borrow::Borrow;

use tch::nn::{Linear, Module, Path};
use tch::{Kind, Tensor};

use crate::layers::{dense, Dropout};
use crate::module::FallibleModuleT;
use crate::util::CausalMask;
use crate::TransformerError;

/// Small constant to avoid division by zero in class normalization.
const CLASS_NORM_EPSILON: f64 = 1e-7;

/// Multi-head causal self-attention (Vaswani et al., 2017).
///
/// Every time step attends to itself and the preceding time steps.
#[derive(Debug)]
pub struct MultiHeadSelfAttention {
    attention_head_size: i64,
    num_attention_heads: i64,

    dropout: Dropout,
    output: Linear,
    qkv: Linear,
}

impl MultiHeadSelfAttention {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        hidden_size: i64,
        num_attention_heads: i64,
        attention_dropout: f64,
    ) -> Result<Self, TransformerError> {
        if num_attention_heads <= 0 || hidden_size % num_attention_heads != 0 {
            return Err(TransformerError::IncorrectHiddenSize {
                hidden_size,
                num_attention_heads,
            });
        }

        let vs = vs.borrow();

        Ok(MultiHeadSelfAttention {
            attention_head_size: hidden_size / num_attention_heads,
            num_attention_heads,

            dropout: Dropout::new(attention_dropout),
            output: dense(vs / "output", hidden_size, hidden_size, false)?,
            qkv: dense(vs / "qkv", hidden_size, 3 * hidden_size, false)?,
        })
    }

    /// Apply self-attention.
    ///
    /// Return the contextualized representations and attention
    /// probabilities.
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor), TransformerError> {
        let (batch_size, seq_len, hidden_size) = hidden_states.size3()?;

        let qkv = self.qkv.forward(hidden_states).f_chunk(3, -1)?;
        let query_layer = self.transpose_for_scores(&qkv[0])?;
        let key_layer = self.transpose_for_scores(&qkv[1])?;
        let value_layer = self.transpose_for_scores(&qkv[2])?;

        // Get the raw attention scores.
        let attention_scores = query_layer
            .f_matmul(&key_layer.f_transpose(-1, -2)?)?
            .f_div_scalar((self.attention_head_size as f64).sqrt())?;

        let mask = CausalMask::new(seq_len, hidden_states.device())?;
        let attention_scores = attention_scores.f_add(&mask)?;

        // Convert the raw attention scores into a probability distribution.
        let attention_probs = attention_scores.f_softmax(-1, Kind::Float)?;

        // Drop out entire tokens to attend to (Vaswani et al., 2017).
        let attention_probs = self.dropout.forward_t(&attention_probs, train)?;

        let context_layer = attention_probs
            .f_matmul(&value_layer)?
            .f_permute(&[0, 2, 1, 3])?
            .contiguous()
            .f_view([batch_size, seq_len, hidden_size])?;

        Ok((self.output.forward(&context_layer), attention_probs))
    }

    fn transpose_for_scores(&self, x: &Tensor) -> Result<Tensor, TransformerError> {
        let (batch_size, seq_len, _) = x.size3()?;

        Ok(x.f_view([
            batch_size,
            seq_len,
            self.num_attention_heads,
            self.attention_head_size,
        ])?
        .f_permute(&[0, 2, 1, 3])?)
    }
}

/// Causal agglomerative attention.
///
/// Instead of computing attention between all pairs of time steps,
/// each time step is softly assigned to one of `n_classes` classes.
/// Every class is summarized by the class-weighted mean of the values
/// of the time steps up to and including the current time step. The
/// output of a time step is the mixture of the class summaries, weighted
/// by the class probabilities of that time step.
///
/// The cost of this attention mechanism is linear in the sequence
/// length, rather than quadratic.
#[derive(Debug)]
pub struct AgglomerativeAttention {
    classes: Linear,
    dropout: Dropout,
    output: Linear,
    value: Linear,
}

impl AgglomerativeAttention {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        hidden_size: i64,
        n_classes: i64,
        attention_dropout: f64,
    ) -> Result<Self, TransformerError> {
        if n_classes <= 0 {
            return Err(TransformerError::IncorrectHiddenSize {
                hidden_size,
                num_attention_heads: n_classes,
            });
        }

        let vs = vs.borrow();

        Ok(AgglomerativeAttention {
            classes: dense(vs / "classes", hidden_size, n_classes, false)?,
            dropout: Dropout::new(attention_dropout),
            output: dense(vs / "output", hidden_size, hidden_size, false)?,
            value: dense(vs / "value", hidden_size, hidden_size, false)?,
        })
    }

    /// Apply agglomerative attention.
    ///
    /// Return the contextualized representations and the class
    /// probabilities of shape `[batch_size, seq_len, n_classes]`.
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor), TransformerError> {
        let class_probs = self
            .classes
            .forward(hidden_states)
            .f_softmax(-1, Kind::Float)?;
        let class_probs = self.dropout.forward_t(&class_probs, train)?;

        // [batch_size, seq_len, hidden_size]
        let values = self.value.forward(hidden_states);

        // Class-weighted values: [batch_size, seq_len, n_classes, hidden_size].
        let weighted_values = class_probs.f_unsqueeze(-1)?.f_mul(&values.f_unsqueeze(2)?)?;

        // Running class sums and normalizers over the time steps seen so far.
        let class_sums = weighted_values.f_cumsum(1, Kind::Float)?;
        let class_norms = class_probs
            .f_cumsum(1, Kind::Float)?
            .f_clamp_min(CLASS_NORM_EPSILON)?
            .f_unsqueeze(-1)?;
        let class_summaries = class_sums.f_div(&class_norms)?;

        let context_layer = class_summaries
            .f_mul(&class_probs.f_unsqueeze(-1)?)?
            .f_sum_dim_intlist(&[2][..], false, Kind::Float)?;

        Ok((self.output.forward(&context_layer), class_probs))
    }
}

/// Causal self-attention variants.
#[derive(Debug)]
pub enum SelfAttention {
    /// Agglomerative attention.
    Agglomerative(AgglomerativeAttention),

    /// Full multi-head attention.
    Full(MultiHeadSelfAttention),
}

impl SelfAttention {
    /// Construct causal self-attention.
    ///
    /// If `agglomerative` is `true`, agglomerative attention is used with
    /// `num_heads` classes. Otherwise, full multi-head attention is used
    /// with `num_heads` heads.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        hidden_size: i64,
        num_heads: i64,
        attention_dropout: f64,
        agglomerative: bool,
    ) -> Result<Self, TransformerError> {
        if agglomerative {
            Ok(SelfAttention::Agglomerative(AgglomerativeAttention::new(
                vs,
                hidden_size,
                num_heads,
                attention_dropout,
            )?))
        } else {
            Ok(SelfAttention::Full(MultiHeadSelfAttention::new(
                vs,
                hidden_size,
                num_heads,
                attention_dropout,
            )?))
        }
    }

    /// Apply self-attention.
    ///
    /// Returns the contextualized representations and the attention
    /// weights of the underlying attention mechanism.
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor), TransformerError> {
        match self {
            SelfAttention::Agglomerative(attention) => attention.forward_t(hidden_states, train),
            SelfAttention::Full(attention) => attention.forward_t(hidden_states, train),
        }
    }
}
