//! Adaptive computation time (Graves, 2016).

use std::borrow::Borrow;

use tch::nn::{Init, Path};
use tch::{Kind, Tensor};

use crate::util::glorot_uniform;
use crate::TransformerError;

/// Adaptive computation time hyperparameters.
#[derive(Clone, Debug)]
pub struct ActConfig {
    /// Slack of the halting budget. A time step halts once its halting
    /// probabilities sum to at least *1 - halt_epsilon*.
    pub halt_epsilon: f64,

    /// Size of the hidden representations.
    pub hidden_size: i64,

    /// Initial bias of the halting unit.
    pub initial_bias: f64,

    /// Weight of the ponder cost.
    pub time_penalty: f64,
}

/// Adaptive computation time for Universal Transformers.
///
/// At every depth step, a halting unit predicts for each time step how
/// much of the step's representation should be committed to the final
/// (pondered) representation. Once the committed probability mass of a
/// time step reaches the halting budget, the remainder is committed and
/// the time step stops contributing. The pondered representation is the
/// halting-weighted sum of the representations of all depth steps.
///
/// The layer only holds the trainable halting unit. The accumulators of
/// a single forward pass are stored in [`ActState`], which is obtained
/// through [`AdaptiveComputationTime::begin`], updated with
/// [`AdaptiveComputationTime::step`] and closed with
/// [`AdaptiveComputationTime::finalize`].
#[derive(Debug)]
pub struct AdaptiveComputationTime {
    halt_epsilon: f64,
    halting_biases: Tensor,
    halting_kernel: Tensor,
    time_penalty: f64,
}

impl AdaptiveComputationTime {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        config: &ActConfig,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        Ok(AdaptiveComputationTime {
            halt_epsilon: config.halt_epsilon,
            halting_biases: vs.f_var("halting_biases", &[], Init::Const(config.initial_bias))?,
            halting_kernel: vs.f_var(
                "halting_kernel",
                &[config.hidden_size, 1],
                glorot_uniform(config.hidden_size, 1),
            )?,
            time_penalty: config.time_penalty,
        })
    }

    /// Start a new forward pass.
    pub fn begin(&self) -> ActState {
        ActState {
            control: None,
            n_steps: 0,
            ponder_cost: None,
            weighted_output: None,
        }
    }

    /// Apply a depth step.
    ///
    /// Returns the input of the next depth step and the pondered output
    /// accumulated so far.
    pub fn step(
        &self,
        state: &mut ActState,
        input: &Tensor,
    ) -> Result<(Tensor, Tensor), TransformerError> {
        // [batch_size, seq_len]
        let halting = input
            .f_matmul(&self.halting_kernel)?
            .f_add(&self.halting_biases)?
            .f_sigmoid()?
            .f_squeeze_dim(-1)?;

        let control = match state.control.take() {
            Some(control) => control,
            None => ControlTensors::new(&halting, self.halt_epsilon)?,
        };

        // Time steps that still have budget left.
        let step_is_active = control.halt_budget.f_gt(0.)?.to_kind(Kind::Float);

        // Time steps that exhaust their budget in this step.
        let no_further_steps = control
            .halt_budget
            .f_sub(&halting)?
            .f_le(0.)?
            .to_kind(Kind::Float);
        let further_steps = no_further_steps.f_neg()?.f_add_scalar(1.)?;

        // The halting probability is the output of the halting unit, unless
        // the budget is exhausted; then the remainder is used. Inactive time
        // steps do not contribute.
        let halting_probability = step_is_active.f_mul(
            &no_further_steps
                .f_mul(&control.remainder)?
                .f_add(&further_steps.f_mul(&halting)?)?,
        )?;

        let active_steps = control.active_steps.f_add(&step_is_active)?;

        // Overwritten in every step, the last step determines the cost.
        state.ponder_cost = Some(
            control
                .remainder
                .f_add(&active_steps)?
                .f_mean(Kind::Float)?
                .f_mul_scalar(self.time_penalty)?,
        );

        let remainder = no_further_steps.f_mul(&control.remainder)?.f_add(
            &further_steps.f_mul(&control.remainder.f_sub(&halting_probability)?)?,
        )?;
        let halt_budget = control.halt_budget.f_sub(&halting_probability)?;

        let step_weighted_output = halting_probability.f_unsqueeze(-1)?.f_mul(input)?;
        let weighted_output = match state.weighted_output.take() {
            Some(weighted_output) => weighted_output.f_add(&step_weighted_output)?,
            None => step_weighted_output,
        };

        state.control = Some(ControlTensors {
            active_steps,
            halt_budget,
            remainder,
        });
        state.n_steps += 1;
        state.weighted_output = Some(weighted_output.shallow_clone());

        Ok((input.shallow_clone(), weighted_output))
    }

    /// Finish the forward pass.
    ///
    /// Returns the pondered output and the ponder cost.
    pub fn finalize(&self, state: ActState) -> Result<ActOutput, TransformerError> {
        match (state.weighted_output, state.ponder_cost) {
            (Some(pondered), Some(ponder_cost)) => {
                log::trace!("Finalized adaptive computation time after {} steps", state.n_steps);
                Ok(ActOutput {
                    pondered,
                    ponder_cost,
                })
            }
            _ => Err(TransformerError::NoComputationSteps),
        }
    }
}

/// Control tensors of adaptive computation time.
///
/// All tensors have shape `[batch_size, seq_len]`.
#[derive(Debug)]
struct ControlTensors {
    active_steps: Tensor,
    halt_budget: Tensor,
    remainder: Tensor,
}

impl ControlTensors {
    fn new(halting: &Tensor, halt_epsilon: f64) -> Result<Self, TransformerError> {
        let ones = halting.f_ones_like()?;

        Ok(ControlTensors {
            active_steps: halting.f_zeros_like()?,
            halt_budget: ones.f_sub_scalar(halt_epsilon)?,
            remainder: ones,
        })
    }
}

/// State of adaptive computation time during a forward pass.
#[derive(Debug)]
pub struct ActState {
    control: Option<ControlTensors>,
    n_steps: usize,
    ponder_cost: Option<Tensor>,
    weighted_output: Option<Tensor>,
}

impl ActState {
    /// The number of depth steps applied so far.
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }
}

/// Result of adaptive computation time.
#[derive(Debug)]
pub struct ActOutput {
    /// Halting-weighted sum of the representations of all depth steps.
    pub pondered: Tensor,

    /// Ponder cost, to be added to the loss.
    pub ponder_cost: Tensor,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use approx::assert_abs_diff_eq;
    use maplit::btreeset;
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};

    use super::{ActConfig, AdaptiveComputationTime};
    use crate::TransformerError;

    fn act_with_bias(vs: &VarStore, bias: f64) -> AdaptiveComputationTime {
        AdaptiveComputationTime::new(
            vs.root(),
            &ActConfig {
                halt_epsilon: 0.01,
                hidden_size: 4,
                initial_bias: bias,
                time_penalty: 0.01,
            },
        )
        .unwrap()
    }

    fn abs_diff(t1: &Tensor, t2: &Tensor) -> f64 {
        (t1 - t2).abs().sum(Kind::Float).double_value(&[])
    }

    #[test]
    fn saturated_halting_ponders_first_step() {
        let vs = VarStore::new(Device::Cpu);
        let act = act_with_bias(&vs, 50.);

        let step0 = Tensor::rand(&[2, 3, 4], (Kind::Float, Device::Cpu)) * 0.1;
        let step1 = Tensor::rand(&[2, 3, 4], (Kind::Float, Device::Cpu)) * 0.1;

        let mut state = act.begin();
        let (next, _) = act.step(&mut state, &step0).unwrap();
        assert_abs_diff_eq!(abs_diff(&next, &step0), 0.);
        let (_, pondered) = act.step(&mut state, &step1).unwrap();
        assert_eq!(state.n_steps(), 2);

        // All probability mass is committed in the first step.
        assert_abs_diff_eq!(abs_diff(&pondered, &step0), 0., epsilon = 1e-5);

        let output = act.finalize(state).unwrap();
        assert_abs_diff_eq!(abs_diff(&output.pondered, &step0), 0., epsilon = 1e-5);

        // remainder (1) + active steps (1)
        assert_abs_diff_eq!(output.ponder_cost.double_value(&[]), 0.02, epsilon = 1e-6);
    }

    #[test]
    fn non_halting_steps_commit_little() {
        let vs = VarStore::new(Device::Cpu);
        let act = act_with_bias(&vs, -50.);

        let input = Tensor::rand(&[1, 3, 4], (Kind::Float, Device::Cpu)) * 0.1;

        let mut state = act.begin();
        for _ in 0..3 {
            act.step(&mut state, &input).unwrap();
        }
        let output = act.finalize(state).unwrap();

        assert_abs_diff_eq!(
            output.pondered.abs().sum(Kind::Float).double_value(&[]),
            0.,
            epsilon = 1e-6
        );

        // remainder (~1) + active steps (3)
        assert_abs_diff_eq!(output.ponder_cost.double_value(&[]), 0.04, epsilon = 1e-6);
    }

    #[test]
    fn halting_weights_sum_to_at_most_one() {
        let vs = VarStore::new(Device::Cpu);
        let mut act = act_with_bias(&vs, 0.1);
        tch::no_grad(|| {
            let _ = act.halting_kernel.fill_(0.);
        });

        let ones = Tensor::ones(&[2, 5, 4], (Kind::Float, Device::Cpu));

        let mut state = act.begin();
        for _ in 0..10 {
            act.step(&mut state, &ones).unwrap();
        }
        let output = act.finalize(state).unwrap();

        // With all-ones inputs, each pondered element is the sum of the
        // halting weights of its time step.
        let max_weight = output.pondered.max().double_value(&[]);
        assert!(max_weight <= 1. + 1e-5);

        // sigmoid(0.1) > 0.5, so the second step commits the remainder.
        assert_abs_diff_eq!(
            output.pondered.min().double_value(&[]),
            1.,
            epsilon = 1e-5
        );
    }

    #[test]
    fn finalize_requires_steps() {
        let vs = VarStore::new(Device::Cpu);
        let act = act_with_bias(&vs, 0.1);
        assert!(matches!(
            act.finalize(act.begin()),
            Err(TransformerError::NoComputationSteps)
        ));
    }

    #[test]
    fn act_names() {
        let vs = VarStore::new(Device::Cpu);
        let _act = act_with_bias(&vs, 0.1);

        let variables = vs
            .variables()
            .into_iter()
            .map(|(k, _)| k)
            .collect::<BTreeSet<_>>();
        assert_eq!(
            variables,
            btreeset![
                "halting_biases".to_string(),
                "halting_kernel".to_string()
            ]
        );
    }
}
