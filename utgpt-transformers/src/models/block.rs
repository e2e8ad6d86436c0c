//! Transformer block that is shared across depth steps.

use std::borrow::Borrow;

use tch::nn::{Linear, Module, Path};
use tch::Tensor;

use crate::activations::Activation;
use crate::layers::{dense, Dropout, LayerNorm};
use crate::models::attention::SelfAttention;
use crate::module::{FallibleModule, FallibleModuleT};
use crate::TransformerError;

/// Transformer block hyperparameters.
#[derive(Clone, Debug)]
pub struct TransformerBlockConfig {
    /// Use agglomerative attention instead of full attention.
    pub agglomerative_attention: bool,

    /// Dropout probability of attention weights.
    pub attention_dropout: f64,

    /// Size of the hidden representations.
    pub hidden_size: i64,

    /// Layer normalization epsilon.
    pub layer_norm_eps: f64,

    /// Number of attention heads or agglomeration classes.
    pub num_heads: i64,

    /// Dropout probability of the residual connections.
    pub residual_dropout: f64,

    /// Activation of the transition layer.
    pub transition_activation: Activation,

    /// Size of the transition layer relative to the hidden size.
    pub transition_size_multiplier: i64,
}

/// Position-wise feed-forward transition.
#[derive(Debug)]
pub struct Transition {
    activation: Activation,
    dense1: Linear,
    dense2: Linear,
}

impl Transition {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        config: &TransformerBlockConfig,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        let intermediate_size = config.transition_size_multiplier * config.hidden_size;

        Ok(Transition {
            activation: config.transition_activation,
            dense1: dense(vs / "dense1", config.hidden_size, intermediate_size, true)?,
            dense2: dense(vs / "dense2", intermediate_size, config.hidden_size, true)?,
        })
    }
}

impl FallibleModule for Transition {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        let hidden = self.activation.forward(&self.dense1.forward(input))?;
        Ok(self.dense2.forward(&hidden))
    }
}

/// Transformer block.
///
/// The block uses the wiring of the Universal Transformer, where
/// dropout is applied after the residual addition:
///
/// *n = LN(dropout(x + attention(x)))*
///
/// *output = LN(dropout(n + transition(n)))*
///
/// Attention is always causal.
#[derive(Debug)]
pub struct TransformerBlock {
    attention: SelfAttention,
    attention_layer_norm: LayerNorm,
    residual_dropout: Dropout,
    transition: Transition,
    transition_layer_norm: LayerNorm,
}

impl TransformerBlock {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        config: &TransformerBlockConfig,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        Ok(TransformerBlock {
            attention: SelfAttention::new(
                vs / "attention",
                config.hidden_size,
                config.num_heads,
                config.attention_dropout,
                config.agglomerative_attention,
            )?,
            attention_layer_norm: LayerNorm::new(
                vs / "attention_layer_norm",
                vec![config.hidden_size],
                config.layer_norm_eps,
                true,
            )?,
            residual_dropout: Dropout::new(config.residual_dropout),
            transition: Transition::new(vs / "transition", config)?,
            transition_layer_norm: LayerNorm::new(
                vs / "transition_layer_norm",
                vec![config.hidden_size],
                config.layer_norm_eps,
                true,
            )?,
        })
    }

    /// The attention mechanism of this block.
    pub fn attention(&self) -> &SelfAttention {
        &self.attention
    }
}

impl FallibleModuleT for TransformerBlock {
    type Error = TransformerError;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error> {
        let (attention_output, _) = self.attention.forward_t(input, train)?;
        let post_residual = self
            .residual_dropout
            .forward_t(&input.f_add(&attention_output)?, train)?;
        let normalized = self.attention_layer_norm.forward(&post_residual)?;

        let transition_output = self.transition.forward(&normalized)?;
        let post_residual = self
            .residual_dropout
            .forward_t(&normalized.f_add(&transition_output)?, train)?;
        self.transition_layer_norm.forward(&post_residual)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use maplit::btreeset;
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};

    use super::{TransformerBlock, TransformerBlockConfig};
    use crate::activations::Activation;
    use crate::models::attention::SelfAttention;
    use crate::module::FallibleModuleT;

    fn block_config(agglomerative_attention: bool) -> TransformerBlockConfig {
        TransformerBlockConfig {
            agglomerative_attention,
            attention_dropout: 0.1,
            hidden_size: 8,
            layer_norm_eps: 1e-5,
            num_heads: 2,
            residual_dropout: 0.1,
            transition_activation: Activation::Gelu,
            transition_size_multiplier: 4,
        }
    }

    fn varstore_variables(vs: &VarStore) -> BTreeSet<String> {
        vs.variables()
            .into_iter()
            .map(|(k, _)| k)
            .collect::<BTreeSet<_>>()
    }

    #[test]
    fn transformer_block_preserves_shape() {
        let vs = VarStore::new(Device::Cpu);
        let block = TransformerBlock::new(vs.root(), &block_config(false)).unwrap();
        let output = block
            .forward_t(&Tensor::rand(&[2, 5, 8], (Kind::Float, Device::Cpu)), true)
            .unwrap();
        assert_eq!(output.size(), &[2, 5, 8]);
    }

    #[test]
    fn transformer_block_selects_attention() {
        let vs = VarStore::new(Device::Cpu);
        let full = TransformerBlock::new(vs.root().sub("full"), &block_config(false)).unwrap();
        let agglomerative =
            TransformerBlock::new(vs.root().sub("agglomerative"), &block_config(true)).unwrap();

        assert!(matches!(full.attention(), SelfAttention::Full(_)));
        assert!(matches!(
            agglomerative.attention(),
            SelfAttention::Agglomerative(_)
        ));
    }

    #[test]
    fn transformer_block_names() {
        let vs = VarStore::new(Device::Cpu);
        let _block = TransformerBlock::new(vs.root(), &block_config(false)).unwrap();

        assert_eq!(
            varstore_variables(&vs),
            btreeset![
                "attention.output.weight".to_string(),
                "attention.qkv.weight".to_string(),
                "attention_layer_norm.bias".to_string(),
                "attention_layer_norm.weight".to_string(),
                "transition.dense1.bias".to_string(),
                "transition.dense1.weight".to_string(),
                "transition.dense2.bias".to_string(),
                "transition.dense2.weight".to_string(),
                "transition_layer_norm.bias".to_string(),
                "transition_layer_norm.weight".to_string()
            ]
        );
    }

    #[test]
    fn agglomerative_transformer_block_names() {
        let vs = VarStore::new(Device::Cpu);
        let _block = TransformerBlock::new(vs.root(), &block_config(true)).unwrap();

        let variables = varstore_variables(&vs);
        assert!(variables.contains("attention.classes.weight"));
        assert!(variables.contains("attention.value.weight"));
        assert!(!variables.contains("attention.qkv.weight"));
    }
}
