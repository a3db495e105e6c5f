//! Learned homoscedastic-uncertainty weighting between loss terms.

use burn::{module::Param, prelude::*};

/// Configuration for [`UncertaintyLossBalancer`].
#[derive(Config, Debug)]
pub struct UncertaintyLossBalancerConfig {}

impl UncertaintyLossBalancerConfig {
    /// Initialize a balancer with both uncertainty weights at zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> UncertaintyLossBalancer<B> {
        UncertaintyLossBalancer {
            loss_weights: Param::from_tensor(Tensor::zeros([2], device)),
        }
    }
}

/// Combines classification and regression losses through two learned
/// uncertainty scalars.
///
/// Each term becomes `exp(-w) * loss + 0.5 * w`: the exponential downweights
/// a task whose learned uncertainty grows while the additive penalty keeps
/// the uncertainty from growing without bound. Both weights start at zero,
/// making the balancer a no-op at step 0; only the enclosing optimizer
/// updates them.
#[derive(Module, Debug)]
pub struct UncertaintyLossBalancer<B: Backend> {
    loss_weights: Param<Tensor<B, 1>>,
}

impl<B: Backend> UncertaintyLossBalancer<B> {
    /// Collapses per-image loss lists into one weighted scalar per task.
    pub fn forward(
        &self,
        losses_cls: Vec<Tensor<B, 1>>,
        losses_reg: Vec<Tensor<B, 1>>,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let weights = self.loss_weights.val();
        let device = weights.device();
        let w_cls = weights.clone().slice([0..1]);
        let w_reg = weights.slice([1..2]);

        let total_cls = Self::sum_means(losses_cls, &device);
        let total_reg = Self::sum_means(losses_reg, &device);

        (
            w_cls.clone().neg().exp() * total_cls + w_cls.mul_scalar(0.5),
            w_reg.clone().neg().exp() * total_reg + w_reg.mul_scalar(0.5),
        )
    }

    fn sum_means(losses: Vec<Tensor<B, 1>>, device: &B::Device) -> Tensor<B, 1> {
        losses
            .into_iter()
            .fold(Tensor::zeros([1], device), |acc, loss| acc + loss.mean())
    }
}
