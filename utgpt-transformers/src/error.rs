use tch::TchError;
use thiserror::Error;

/// Transformer errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransformerError {
    /// The convolution width is not positive.
    #[error("convolution width should be larger than 0, was: {width:?}")]
    IncorrectConvolutionWidth { width: i64 },

    /// The transformer depth is not positive.
    #[error("transformer depth should be larger than 0, was: {depth:?}")]
    IncorrectDepth { depth: i64 },

    /// The hidden size is not a multiple of the number of attention heads.
    #[error("hidden size ({hidden_size:?}) is not a multiple of attention heads ({num_attention_heads:?})")]
    IncorrectHiddenSize {
        /// The hidden size.
        hidden_size: i64,

        /// The number of attention heads.
        num_attention_heads: i64,
    },

    /// The input does not have the expected shape.
    #[error("expected input of shape {expected}, got: {shape:?}")]
    IncorrectInputShape { expected: String, shape: Vec<i64> },

    /// A depth-indexed layer was applied to a step beyond its depth.
    #[error("step {step} is out of range for depth {depth}")]
    DepthOutOfRange { step: i64, depth: i64 },

    /// Adaptive computation time was finalized without any step.
    #[error("adaptive computation time was finalized without computation steps")]
    NoComputationSteps,

    /// The sequence is longer than the maximum sequence length.
    #[error("sequence length {seq_len} exceeds the maximum sequence length {max_seq_length}")]
    SequenceTooLong { seq_len: i64, max_seq_length: i64 },

    /// Torch error.
    #[error(transparent)]
    Tch(#[from] TchError),
}

impl TransformerError {
    pub(crate) fn incorrect_input_shape(expected: impl Into<String>, shape: Vec<i64>) -> Self {
        TransformerError::IncorrectInputShape {
            expected: expected.into(),
            shape,
        }
    }
}
