//! Smooth-L1 regression loss with elementwise weighting.

use burn::{prelude::*, tensor::ElementConversion};

/// Configuration for [`SmoothL1Loss`].
#[derive(Config, Debug)]
pub struct SmoothL1LossConfig {
    /// Transition point between the quadratic and linear branches.
    #[config(default = "1.0")]
    pub beta: f64,
}

impl SmoothL1LossConfig {
    /// Initialize a new smooth-L1 loss with the given configuration.
    pub const fn init<B: Backend>(&self) -> SmoothL1Loss<B> {
        SmoothL1Loss {
            beta: self.beta,
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Smooth-L1 loss: quadratic below `beta`, linear above, continuous and
/// differentiable at the boundary.
#[derive(Module, Debug)]
pub struct SmoothL1Loss<B: Backend> {
    pub beta: f64,
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> SmoothL1Loss<B> {
    /// Elementwise loss without reduction.
    ///
    /// `0.5 * d^2 / beta` for `|d| < beta`, `|d| - 0.5 * beta` otherwise.
    pub fn forward_no_reduction<const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let diff = (pred - target).abs();
        let below = diff.clone().lower_elem(self.beta.elem::<B::FloatElem>());

        let quadratic = diff.clone().powf_scalar(2.0).mul_scalar(0.5 / self.beta);
        let linear = diff.sub_scalar(0.5 * self.beta);

        linear.mask_where(below, quadratic)
    }

    /// Weighted, summed loss normalized by `avg_factor`.
    ///
    /// The weight tensor zeroes out anchors (and coordinates) that do not
    /// contribute; `avg_factor` is supplied by the caller so the
    /// normalization can span the whole batch.
    pub fn forward_weighted<const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
        weight: Tensor<B, D>,
        avg_factor: f64,
    ) -> Tensor<B, 1> {
        assert!(avg_factor > 0.0, "avg_factor must be positive");
        (self.forward_no_reduction(pred, target) * weight)
            .sum()
            .div_scalar(avg_factor)
    }
}
