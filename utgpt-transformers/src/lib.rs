pub mod activations;

pub mod error;
pub use error::TransformerError;

pub mod layers;

pub mod loss;

pub mod models;

pub mod module;

pub mod util;
