use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use utgpt_transformers::models::gpt::UniversalTransformerConfig;

use crate::error::UtGptError;

/// Arguments of the GPT model construction stage.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GptModelArgs {
    /// Width of the causal convolutions.
    pub convolution_width: i64,

    /// Number of times the transformer block is applied.
    pub depth: i64,

    /// Number of attention heads or agglomeration classes.
    pub num_heads: i64,

    /// Print a summary of the model after construction.
    pub print_summary: bool,

    /// Use agglomerative instead of full attention.
    pub use_agglomeration: bool,

    /// Use causal convolutions instead of coordinate embeddings.
    pub use_convolutions: bool,

    /// Working width of the model.
    pub width: i64,
}

impl Default for GptModelArgs {
    fn default() -> Self {
        GptModelArgs {
            convolution_width: 8,
            depth: 6,
            num_heads: 8,
            print_summary: false,
            use_agglomeration: false,
            use_convolutions: false,
            width: 64,
        }
    }
}

impl GptModelArgs {
    /// Model configuration for the given vocabulary and sequence length.
    ///
    /// Coordinate embeddings are only used when convolutions are not.
    pub fn model_config(
        &self,
        vocabulary_size: i64,
        sequence_length: i64,
    ) -> UniversalTransformerConfig {
        UniversalTransformerConfig {
            agglomerative_attention: self.use_agglomeration,
            convolution_width: self.convolution_width,
            max_seq_length: sequence_length,
            num_heads: self.num_heads,
            transformer_depth: self.depth,
            use_convolutions: self.use_convolutions,
            use_coordinate_embeddings: !self.use_convolutions,
            vocabulary_size,
            word_embedding_size: self.width,
            ..UniversalTransformerConfig::default()
        }
    }
}

pub trait TomlRead
where
    Self: Sized,
{
    fn from_toml_read(read: impl Read) -> Result<Self, UtGptError>;
}

impl TomlRead for GptModelArgs {
    fn from_toml_read(mut read: impl Read) -> Result<Self, UtGptError> {
        let mut data = String::new();
        read.read_to_string(&mut data)?;
        let args: GptModelArgs = toml::from_str(&data)?;
        Ok(args)
    }
}

/// Write a model configuration as JSON.
pub fn write_model_config(
    config: &UniversalTransformerConfig,
    write: impl Write,
) -> Result<(), UtGptError> {
    serde_json::to_writer_pretty(write, config).map_err(|err| {
        UtGptError::JSonSerialization("Cannot write model configuration".to_string(), err)
    })
}

/// Read a model configuration from JSON.
pub fn read_model_config(read: impl Read) -> Result<UniversalTransformerConfig, UtGptError> {
    serde_json::from_reader(read).map_err(|err| {
        UtGptError::JSonSerialization("Cannot read model configuration".to_string(), err)
    })
}
