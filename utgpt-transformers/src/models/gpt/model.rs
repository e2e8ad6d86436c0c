use std::borrow::Borrow;

use tch::nn::Path;
use tch::{Kind, Tensor};

use crate::activations::Activation;
use crate::layers::CausalConv1D;
use crate::loss::{confidence_penalty, l2_penalty, CrossEntropyLoss};
use crate::models::act::AdaptiveComputationTime;
use crate::models::block::TransformerBlock;
use crate::models::coordinate::CoordinateEmbedding;
use crate::models::embeddings::{ReusableEmbedding, TiedOutputEmbedding};
use crate::models::gpt::{AuxiliaryLosses, GptLoss, GptOutput, UniversalTransformerConfig};
use crate::module::{FallibleModule, FallibleModuleT, StepModule};
use crate::TransformerError;

/// Targets with this value do not contribute to the loss.
const IGNORE_INDEX: i64 = -1;

/// GPT-style language model with a Universal Transformer.
///
/// The model is similar to the GPT model of *Improving Language
/// Understanding by Generative Pre-Training* (Radford et al., 2018),
/// with two differences:
///
/// 1. A single transformer block is applied `transformer_depth` times
///    (Dehghani et al., 2018). The representations of the depth steps
///    are combined using adaptive computation time.
/// 2. The word embedding matrix is shared between the input and the
///    output layer and is regularized using an L2 penalty.
#[derive(Debug)]
pub struct UniversalTransformerGpt {
    act: AdaptiveComputationTime,
    confidence_penalty_weight: Option<f64>,
    convolution: Option<CausalConv1D>,
    coordinate_embedding: Option<CoordinateEmbedding>,
    depth: i64,
    embeddings: ReusableEmbedding,
    l2_reg_penalty: Option<f64>,
    max_seq_length: i64,
    output_embedding: TiedOutputEmbedding,
    transformer: TransformerBlock,
}

impl UniversalTransformerGpt {
    /// Construct the model.
    ///
    /// The layers of the model are stored in `vs`.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        config: &UniversalTransformerConfig,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        let embeddings = ReusableEmbedding::new(
            vs / "bpe_embeddings",
            config.vocabulary_size,
            config.word_embedding_size,
        )?;

        let output_embedding = TiedOutputEmbedding::new(
            vs / "word_prediction_logits",
            config.word_embedding_size,
            config.word_embedding_size,
            config.embedding_dropout,
        )?;

        let convolution = if config.use_convolutions {
            Some(CausalConv1D::new(
                vs / "convolution",
                config.word_embedding_size,
                config.word_embedding_size,
                config.convolution_width,
                Some(Activation::Relu),
            )?)
        } else {
            None
        };

        let coordinate_embedding = if config.use_coordinate_embeddings {
            Some(CoordinateEmbedding::new(
                vs / "coordinate_embedding",
                config.max_seq_length,
                config.transformer_depth,
                config.word_embedding_size,
            )?)
        } else {
            None
        };

        let transformer = TransformerBlock::new(vs / "transformer", &config.into())?;

        let act = AdaptiveComputationTime::new(vs / "adaptive_computation_time", &config.into())?;

        Ok(UniversalTransformerGpt {
            act,
            confidence_penalty_weight: if config.penalize_confidence {
                Some(config.confidence_penalty_weight)
            } else {
                None
            },
            convolution,
            coordinate_embedding,
            depth: config.transformer_depth,
            embeddings,
            l2_reg_penalty: config.l2_reg_penalty.filter(|&penalty| penalty > 0.),
            max_seq_length: config.max_seq_length,
            output_embedding,
            transformer,
        })
    }

    /// The word embedding matrix.
    ///
    /// The same matrix is used for embedding the input pieces and for
    /// predicting the output pieces.
    pub fn embedding_matrix(&self) -> &Tensor {
        self.embeddings.embedding_matrix()
    }

    /// Predict the next piece for every position of `word_ids`.
    ///
    /// `word_ids` has shape `[batch_size, seq_len]`, where `seq_len` is
    /// at most the maximum sequence length of the model.
    pub fn forward_t(&self, word_ids: &Tensor, train: bool) -> Result<GptOutput, TransformerError> {
        let shape = word_ids.size();
        if shape.len() != 2 {
            return Err(TransformerError::incorrect_input_shape(
                "[batch_size, seq_len]",
                shape,
            ));
        }

        let seq_len = shape[1];
        if seq_len > self.max_seq_length {
            return Err(TransformerError::SequenceTooLong {
                seq_len,
                max_seq_length: self.max_seq_length,
            });
        }

        let (mut hidden, embedding_matrix) = self.embeddings.forward(word_ids)?;

        let mut act_state = self.act.begin();
        for step in 0..self.depth {
            if let Some(convolution) = &self.convolution {
                hidden = convolution.forward(&hidden)?;
            }

            if let Some(coordinate_embedding) = &self.coordinate_embedding {
                hidden = coordinate_embedding.forward_step(&hidden, step)?;
            }

            hidden = self.transformer.forward_t(&hidden, train)?;

            let (next_step_input, _) = self.act.step(&mut act_state, &hidden)?;
            hidden = next_step_input;
        }
        let act_output = self.act.finalize(act_state)?;

        let logits =
            self.output_embedding
                .forward_t(&act_output.pondered, embedding_matrix, train)?;
        let probabilities = logits.f_softmax(-1, Kind::Float)?;

        let l2_penalty = self
            .l2_reg_penalty
            .map(|strength| {
                l2_penalty(
                    &[embedding_matrix, self.output_embedding.projection()],
                    strength,
                )
            })
            .transpose()?;

        let confidence_penalty = self
            .confidence_penalty_weight
            .map(|weight| confidence_penalty(&logits, weight))
            .transpose()?;

        Ok(GptOutput {
            auxiliary: AuxiliaryLosses {
                confidence_penalty,
                l2_penalty,
                ponder_cost: act_output.ponder_cost,
            },
            logits,
            probabilities,
        })
    }

    /// Compute the loss of a forward pass.
    ///
    /// `targets` has shape `[batch_size, seq_len]` and contains the
    /// identifier of the next piece for every position. Positions with
    /// target `-1` are ignored. See [`CrossEntropyLoss`] for label
    /// smoothing.
    pub fn loss(
        &self,
        output: &GptOutput,
        targets: &Tensor,
        label_smoothing: Option<f64>,
    ) -> Result<GptLoss, TransformerError> {
        let (_, _, vocab_size) = output.logits.size3()?;

        let task_loss = CrossEntropyLoss::new(IGNORE_INDEX, label_smoothing).forward(
            &output.logits.f_view([-1, vocab_size])?,
            &targets.f_view([-1])?,
        )?;
        let auxiliary_loss = output.auxiliary.total()?;
        let total = task_loss.f_add(&auxiliary_loss)?;

        Ok(GptLoss {
            auxiliary_loss,
            task_loss,
            total,
        })
    }

    /// The transformer block that is shared by all depth steps.
    pub fn transformer_block(&self) -> &TransformerBlock {
        &self.transformer
    }
}
