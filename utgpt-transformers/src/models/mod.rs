//! Transformer models.

pub mod act;
pub use act::{ActConfig, ActOutput, ActState, AdaptiveComputationTime};

pub mod attention;
pub use attention::{AgglomerativeAttention, MultiHeadSelfAttention, SelfAttention};

pub mod block;
pub use block::{TransformerBlock, TransformerBlockConfig};

pub mod coordinate;
pub use coordinate::CoordinateEmbedding;

pub mod embeddings;
pub use embeddings::{ReusableEmbedding, TiedOutputEmbedding};

pub mod gpt;
pub use gpt::{UniversalTransformerConfig, UniversalTransformerGpt};
