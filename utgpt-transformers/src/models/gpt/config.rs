use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::models::act::ActConfig;
use crate::models::block::TransformerBlockConfig;

/// Universal Transformer GPT model configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct UniversalTransformerConfig {
    pub act_halt_epsilon: f64,
    pub act_initial_bias: f64,
    pub act_time_penalty: f64,
    pub agglomerative_attention: bool,
    pub confidence_penalty_weight: f64,
    pub convolution_width: i64,
    pub embedding_dropout: f64,
    pub l2_reg_penalty: Option<f64>,
    pub layer_norm_eps: f64,
    pub max_seq_length: i64,
    pub num_heads: i64,
    pub penalize_confidence: bool,
    pub transformer_depth: i64,
    pub transformer_dropout: f64,
    pub transition_activation: Activation,
    pub transition_size_multiplier: i64,
    pub use_convolutions: bool,
    pub use_coordinate_embeddings: bool,
    pub vocabulary_size: i64,
    pub word_embedding_size: i64,
}

impl Default for UniversalTransformerConfig {
    fn default() -> Self {
        UniversalTransformerConfig {
            act_halt_epsilon: 0.01,
            act_initial_bias: 0.1,
            act_time_penalty: 0.01,
            agglomerative_attention: false,
            confidence_penalty_weight: 0.1,
            convolution_width: 0,
            embedding_dropout: 0.6,
            l2_reg_penalty: Some(1e-6),
            layer_norm_eps: 1e-5,
            max_seq_length: 512,
            num_heads: 8,
            penalize_confidence: false,
            transformer_depth: 6,
            transformer_dropout: 0.1,
            transition_activation: Activation::GeluNew,
            transition_size_multiplier: 4,
            use_convolutions: false,
            use_coordinate_embeddings: true,
            vocabulary_size: 30000,
            word_embedding_size: 64,
        }
    }
}

impl From<&UniversalTransformerConfig> for ActConfig {
    fn from(config: &UniversalTransformerConfig) -> Self {
        ActConfig {
            halt_epsilon: config.act_halt_epsilon,
            hidden_size: config.word_embedding_size,
            initial_bias: config.act_initial_bias,
            time_penalty: config.act_time_penalty,
        }
    }
}

impl From<&UniversalTransformerConfig> for TransformerBlockConfig {
    fn from(config: &UniversalTransformerConfig) -> Self {
        TransformerBlockConfig {
            agglomerative_attention: config.agglomerative_attention,
            attention_dropout: config.transformer_dropout,
            hidden_size: config.word_embedding_size,
            layer_norm_eps: config.layer_norm_eps,
            num_heads: config.num_heads,
            residual_dropout: config.transformer_dropout,
            transition_activation: config.transition_activation,
            transition_size_multiplier: config.transition_size_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UniversalTransformerConfig;
    use crate::activations::Activation;

    #[test]
    fn partial_config_uses_defaults() {
        let config: UniversalTransformerConfig = serde_json::from_str(
            r#"{"vocabulary_size": 100, "max_seq_length": 16, "transition_activation": "relu"}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            UniversalTransformerConfig {
                max_seq_length: 16,
                transition_activation: Activation::Relu,
                vocabulary_size: 100,
                ..UniversalTransformerConfig::default()
            }
        );
    }

    #[test]
    fn default_transition_uses_tanh_gelu() {
        let config: UniversalTransformerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.transition_activation, Activation::GeluNew);
    }

    #[test]
    fn l2_penalty_can_be_disabled() {
        let config: UniversalTransformerConfig =
            serde_json::from_str(r#"{"l2_reg_penalty": null}"#).unwrap();
        assert_eq!(config.l2_reg_penalty, None);
    }
}
