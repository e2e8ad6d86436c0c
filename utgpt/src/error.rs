use std::io;

use thiserror::Error;
use utgpt_transformers::TransformerError;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum UtGptError {
    #[error(transparent)]
    IoError(#[from] io::Error),

    #[error("{0}: {1}")]
    JSonSerialization(String, serde_json::Error),

    #[error("Scope does not contain a value for `{0}`")]
    MissingScopeValue(&'static str),

    #[error(transparent)]
    TomlDeserializationError(#[from] toml::de::Error),

    #[error(transparent)]
    TransformerError(#[from] TransformerError),
}
