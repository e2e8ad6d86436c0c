//! Loss functions and regularization terms.

use tch::{Kind, Reduction, Tensor};

use crate::TransformerError;

/// Cross-entropy loss function.
pub struct CrossEntropyLoss {
    ignore_index: i64,
    label_smoothing: Option<f64>,
}

impl CrossEntropyLoss {
    /// Construct the cross-entropy loss function.
    ///
    /// Do not include targets that have `ignore_index` as their value in the
    /// loss computation. If `label_smoothing` is set to *p*, then the correct
    /// label gets probability *1-p* and the probability *p* is distributed
    /// across incorrect labels.
    pub fn new(ignore_index: i64, label_smoothing: Option<f64>) -> Self {
        CrossEntropyLoss {
            ignore_index,
            label_smoothing,
        }
    }

    /// Compute the mean cross-entropy loss.
    ///
    /// `logits` should be the unnormalized probablilities of shape
    /// `[n_instances, n_classes]` and `targets` the gold-standard labels
    /// with shape `[n_instances]`.
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor, TransformerError> {
        let (_, n_classes) = logits.size2()?;
        let log_probs = logits.f_log_softmax(-1, Kind::Float)?;

        match self.label_smoothing {
            Some(label_smoothing) => {
                let token_mask = targets.f_ne(self.ignore_index)?;

                // Do not attempt to use negative indices for the correct target.
                let targets_non_negative = targets.f_mul(&token_mask)?;

                // Set all labels to label_smoothing and the target to 1-label_smoothing.
                let smoothed_targets = tch::no_grad(|| {
                    Tensor::f_full_like(&log_probs, label_smoothing / (n_classes - 1) as f64)?
                        .f_scatter_value(
                            1,
                            &targets_non_negative.f_unsqueeze(1)?,
                            1. - label_smoothing,
                        )
                })?;
                let losses = smoothed_targets
                    .f_neg()?
                    .f_mul(&log_probs)?
                    .f_sum_dim_intlist(&[-1][..], false, Kind::Float)?;

                Ok(losses.f_masked_select(&token_mask)?.f_mean(Kind::Float)?)
            }
            None => Ok(log_probs.f_nll_loss::<&Tensor>(
                targets,
                None,
                Reduction::Mean,
                self.ignore_index,
            )?),
        }
    }
}

/// Penalty for confident output distributions.
///
/// Computes *weight · mean(∑ p log p)*, which is the negative mean
/// entropy of the output distributions scaled by `weight` (Pereyra et
/// al., 2017). Minimizing this term favors less confident predictions.
/// The distributions are given as `logits` with the classes in the last
/// dimension.
pub fn confidence_penalty(logits: &Tensor, weight: f64) -> Result<Tensor, TransformerError> {
    let log_probs = logits.f_log_softmax(-1, Kind::Float)?;
    let neg_entropy = log_probs
        .f_exp()?
        .f_mul(&log_probs)?
        .f_sum_dim_intlist(&[-1][..], false, Kind::Float)?;
    Ok(neg_entropy.f_mean(Kind::Float)?.f_mul_scalar(weight)?)
}

/// L2 regularization penalty: *strength · ∑ w²* over all `weights`.
pub fn l2_penalty(weights: &[&Tensor], strength: f64) -> Result<Tensor, TransformerError> {
    let mut sum_squares = Vec::with_capacity(weights.len());
    for weight in weights {
        sum_squares.push(weight.f_square()?.f_sum(Kind::Float)?);
    }

    Ok(Tensor::f_stack(&sum_squares, 0)?
        .f_sum(Kind::Float)?
        .f_mul_scalar(strength)?)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use tch::Tensor;

    use super::{confidence_penalty, l2_penalty, CrossEntropyLoss};

    #[test]
    fn cross_entropy_loss_without_label_smoothing() {
        let logits = Tensor::from_slice(&[-1f32, -1., 1., -1., -1.]).view([1, 5]);
        let targets = Tensor::from_slice(&[2i64]).view([1]);
        let cross_entropy_loss = CrossEntropyLoss::new(-1, None);
        let loss = cross_entropy_loss.forward(&logits, &targets).unwrap();

        assert_abs_diff_eq!(loss.double_value(&[]), 0.432653, epsilon = 1e-6);
    }

    #[test]
    fn cross_entropy_with_label_smoothing() {
        let logits = Tensor::from_slice(&[-1f32, -1., 1., -1., -1.]).view([1, 5]);
        let targets = Tensor::from_slice(&[2i64]).view([1]);
        let cross_entropy_loss = CrossEntropyLoss::new(-1, Some(0.1));
        let loss = cross_entropy_loss.forward(&logits, &targets).unwrap();

        assert_abs_diff_eq!(loss.double_value(&[]), 0.632653, epsilon = 1e-6);
    }

    #[test]
    fn cross_entropy_ignores_targets() {
        let logits = Tensor::from_slice(&[-1f32, -1., 1., -1., -1., 5., 0., 0., 0., 0.])
            .view([2, 5]);
        let targets = Tensor::from_slice(&[2i64, -1]);
        let loss = CrossEntropyLoss::new(-1, None)
            .forward(&logits, &targets)
            .unwrap();

        assert_abs_diff_eq!(loss.double_value(&[]), 0.432653, epsilon = 1e-6);
    }

    #[test]
    fn confidence_penalty_of_uniform_distribution_is_negative_log_classes() {
        let logits = Tensor::zeros(&[2, 3, 4], (tch::Kind::Float, tch::Device::Cpu));
        let penalty = confidence_penalty(&logits, 0.1).unwrap();

        assert_abs_diff_eq!(
            penalty.double_value(&[]),
            -0.1 * 4f64.ln(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn confident_distributions_have_larger_penalty() {
        let uniform = Tensor::from_slice(&[0f32, 0., 0.]).view([1, 3]);
        let peaked = Tensor::from_slice(&[10f32, 0., 0.]).view([1, 3]);

        let uniform_penalty = confidence_penalty(&uniform, 1.).unwrap().double_value(&[]);
        let peaked_penalty = confidence_penalty(&peaked, 1.).unwrap().double_value(&[]);

        assert!(peaked_penalty > uniform_penalty);
    }

    #[test]
    fn l2_penalty_sums_squares() {
        let w1 = Tensor::from_slice(&[1f32, 2.]);
        let w2 = Tensor::from_slice(&[3f32]);
        let penalty = l2_penalty(&[&w1, &w2], 0.5).unwrap();

        assert_abs_diff_eq!(penalty.double_value(&[]), 7., epsilon = 1e-6);
    }
}
