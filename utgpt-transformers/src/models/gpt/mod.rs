//! GPT-style Universal Transformer language model.

mod config;
pub use config::UniversalTransformerConfig;

mod model;
pub use model::UniversalTransformerGpt;

mod output;
pub use output::{AuxiliaryLosses, GptLoss, GptOutput};
