//! Word embeddings that are shared between the input and the output.

use std::borrow::Borrow;

use tch::nn::Path;
use tch::Tensor;

use crate::layers::{Dropout, Embedding};
use crate::module::{FallibleModule, FallibleModuleT};
use crate::util::{glorot_uniform, SMALL_UNIFORM};
use crate::TransformerError;

/// Embedding layer that exposes its embedding matrix.
///
/// Besides the embeddings of the input pieces, the forward pass returns
/// the embedding matrix itself, so that it can be reused by a
/// [`TiedOutputEmbedding`] to predict pieces (weight tying).
#[derive(Debug)]
pub struct ReusableEmbedding {
    embeddings: Embedding,
}

impl ReusableEmbedding {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        vocab_size: i64,
        embedding_size: i64,
    ) -> Result<Self, TransformerError> {
        Ok(ReusableEmbedding {
            embeddings: Embedding::new(
                vs,
                "embeddings",
                vocab_size,
                embedding_size,
                SMALL_UNIFORM,
            )?,
        })
    }

    /// Embed the pieces in `input_ids`.
    ///
    /// Returns the embeddings and the embedding matrix.
    pub fn forward(&self, input_ids: &Tensor) -> Result<(Tensor, &Tensor), TransformerError> {
        Ok((self.embeddings.forward(input_ids)?, &self.embeddings.0))
    }

    /// The embedding matrix of shape `[vocab_size, embedding_size]`.
    pub fn embedding_matrix(&self) -> &Tensor {
        &self.embeddings.0
    }
}

/// Output layer that predicts pieces using a shared embedding matrix.
///
/// The hidden representations are first projected into the embedding
/// space. The logits are then the dot products of the projections and
/// the piece embeddings.
#[derive(Debug)]
pub struct TiedOutputEmbedding {
    dropout: Dropout,
    projection: Tensor,
}

impl TiedOutputEmbedding {
    /// Construct the tied output layer.
    ///
    /// `projection_dropout` is applied to the projection of the hidden
    /// representations into the embedding space.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        hidden_size: i64,
        embedding_size: i64,
        projection_dropout: f64,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        Ok(TiedOutputEmbedding {
            dropout: Dropout::new(projection_dropout),
            projection: vs.f_var(
                "kernel",
                &[hidden_size, embedding_size],
                glorot_uniform(hidden_size, embedding_size),
            )?,
        })
    }

    /// Compute piece logits.
    ///
    /// `hidden` has shape `[batch_size, seq_len, hidden_size]`, the
    /// returned logits have shape `[batch_size, seq_len, vocab_size]`.
    pub fn forward_t(
        &self,
        hidden: &Tensor,
        embedding_matrix: &Tensor,
        train: bool,
    ) -> Result<Tensor, TransformerError> {
        let projected = hidden.f_matmul(&self.projection)?;
        let projected = self.dropout.forward_t(&projected, train)?;
        Ok(projected.f_matmul(&embedding_matrix.f_transpose(0, 1)?)?)
    }

    /// The projection into the embedding space.
    pub fn projection(&self) -> &Tensor {
        &self.projection
    }
}
