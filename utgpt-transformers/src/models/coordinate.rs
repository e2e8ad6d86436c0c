//! Coordinate embeddings for Universal Transformers.

use std::borrow::Borrow;

use tch::nn::Path;
use tch::Tensor;

use crate::module::StepModule;
use crate::util::SMALL_UNIFORM;
use crate::TransformerError;

/// Trainable coordinate embeddings.
///
/// Universal Transformers apply the same transformer block at every
/// depth step. Before each step, this layer adds a signal that encodes
/// the coordinates of every representation: its position in the
/// sequence and the current depth step (Dehghani et al., 2018). Both
/// are learned embeddings, so the total depth has to be known when the
/// layer is constructed.
#[derive(Debug)]
pub struct CoordinateEmbedding {
    depth_embeddings: Tensor,
    max_depth: i64,
    max_seq_length: i64,
    word_position_embeddings: Tensor,
}

impl CoordinateEmbedding {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        max_seq_length: i64,
        max_depth: i64,
        hidden_size: i64,
    ) -> Result<Self, TransformerError> {
        if max_depth <= 0 {
            return Err(TransformerError::IncorrectDepth { depth: max_depth });
        }

        let vs = vs.borrow();

        Ok(CoordinateEmbedding {
            depth_embeddings: vs.f_var(
                "depth_embeddings",
                &[max_depth, hidden_size],
                SMALL_UNIFORM,
            )?,
            max_depth,
            max_seq_length,
            word_position_embeddings: vs.f_var(
                "word_position_embeddings",
                &[max_seq_length, hidden_size],
                SMALL_UNIFORM,
            )?,
        })
    }
}

impl StepModule for CoordinateEmbedding {
    type Error = TransformerError;

    fn forward_step(&self, input: &Tensor, step: i64) -> Result<Tensor, Self::Error> {
        if !(0..self.max_depth).contains(&step) {
            return Err(TransformerError::DepthOutOfRange {
                step,
                depth: self.max_depth,
            });
        }

        let (_, seq_len, _) = input.size3()?;
        if seq_len > self.max_seq_length {
            return Err(TransformerError::SequenceTooLong {
                seq_len,
                max_seq_length: self.max_seq_length,
            });
        }

        let positions = self.word_position_embeddings.f_narrow(0, 0, seq_len)?;
        let depth = self.depth_embeddings.f_select(0, step)?;

        Ok(input.f_add(&positions)?.f_add(&depth)?)
    }
}
