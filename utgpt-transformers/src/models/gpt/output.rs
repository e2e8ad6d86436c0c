use tch::{Kind, Tensor};

use crate::TransformerError;

/// Auxiliary losses of a forward pass.
#[derive(Debug)]
pub struct AuxiliaryLosses {
    /// Penalty for confident output distributions.
    ///
    /// Only present when the model penalizes confidence.
    pub confidence_penalty: Option<Tensor>,

    /// L2 penalty of the embedding matrix and the output projection.
    ///
    /// Only present when L2 regularization is enabled.
    pub l2_penalty: Option<Tensor>,

    /// Ponder cost of adaptive computation time.
    pub ponder_cost: Tensor,
}

impl AuxiliaryLosses {
    /// Sum of the auxiliary losses that are present.
    pub fn total(&self) -> Result<Tensor, TransformerError> {
        let mut total = self.ponder_cost.f_to_kind(Kind::Float)?;

        if let Some(l2_penalty) = &self.l2_penalty {
            total = total.f_add(l2_penalty)?;
        }

        if let Some(confidence_penalty) = &self.confidence_penalty {
            total = total.f_add(confidence_penalty)?;
        }

        Ok(total)
    }
}

/// Output of the Universal Transformer GPT model.
#[derive(Debug)]
pub struct GptOutput {
    /// Auxiliary losses.
    pub auxiliary: AuxiliaryLosses,

    /// Next-piece logits, `[batch_size, seq_len, vocab_size]`.
    pub logits: Tensor,

    /// Next-piece probabilities, `[batch_size, seq_len, vocab_size]`.
    pub probabilities: Tensor,
}

/// Losses of the Universal Transformer GPT model.
#[derive(Debug)]
pub struct GptLoss {
    /// Sum of the auxiliary losses.
    pub auxiliary_loss: Tensor,

    /// Next-piece prediction loss.
    pub task_loss: Tensor,

    /// Sum of the task and auxiliary losses.
    pub total: Tensor,
}
