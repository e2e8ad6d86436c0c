use std::fmt::Debug;

use tch::Tensor;

/// Module for which a computation can fail.
pub trait FallibleModule: Debug + Send {
    /// The error type.
    type Error;

    /// Apply the module.
    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error>;
}

/// Module for which a computation can fail and that behaves
/// differently during training.
pub trait FallibleModuleT: Debug + Send {
    /// The error type.
    type Error;

    /// Apply the module.
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error>;
}

impl<M> FallibleModuleT for M
where
    M: FallibleModule,
{
    type Error = M::Error;

    fn forward_t(&self, input: &Tensor, _train: bool) -> Result<Tensor, Self::Error> {
        self.forward(input)
    }
}

/// Module that is applied once per step of a recurrent-in-depth model.
///
/// Universal Transformers apply the same layers at every depth step.
/// Modules implementing this trait receive the step index, so that they
/// can add a step-specific signal.
pub trait StepModule: Debug + Send {
    /// The error type.
    type Error;

    /// Apply the module at depth step `step`.
    fn forward_step(&self, input: &Tensor, step: i64) -> Result<Tensor, Self::Error>;
}
