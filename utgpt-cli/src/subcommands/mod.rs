mod build;
pub use build::BuildApp;
