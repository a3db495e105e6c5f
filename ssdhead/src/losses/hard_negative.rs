//! Classification + regression loss with hard negative mining.

use burn::{
    prelude::*,
    tensor::{cast::ToElement, Int},
};

use super::{cross_entropy_none, SmoothL1Loss, SmoothL1LossConfig};

/// Configuration for [`HardNegativeMiningLoss`].
#[derive(Config, Debug)]
pub struct HardNegativeMiningLossConfig {
    /// Upper bound on mined negatives, as a multiple of the positive count.
    #[config(default = "3")]
    pub neg_pos_ratio: usize,
    /// Smooth-L1 transition point for the regression term.
    #[config(default = "1.0")]
    pub smoothl1_beta: f64,
}

impl HardNegativeMiningLossConfig {
    /// Initialize a new mining loss with the given configuration.
    pub fn init<B: Backend>(&self) -> HardNegativeMiningLoss<B> {
        HardNegativeMiningLoss {
            neg_pos_ratio: self.neg_pos_ratio,
            smooth_l1: SmoothL1LossConfig::new().with_beta(self.smoothl1_beta).init(),
        }
    }
}

/// Per-image detection loss balancing positives against mined hard negatives.
///
/// Classification sums the positive losses with the `neg_pos_ratio * num_pos`
/// highest-loss background anchors; regression is smooth-L1 over positive
/// anchors only. Both terms normalize by `num_total_samples`, the positive
/// count across the whole batch — the classification term sums negatives too
/// but still divides by positives only, as the SSD recipe prescribes.
#[derive(Module, Debug)]
pub struct HardNegativeMiningLoss<B: Backend> {
    pub neg_pos_ratio: usize,
    smooth_l1: SmoothL1Loss<B>,
}

impl<B: Backend> HardNegativeMiningLoss<B> {
    /// Computes `(loss_cls, loss_bbox)` for one image.
    ///
    /// # Shapes
    /// - `cls_score`: `[num_anchors, num_classes]`
    /// - `bbox_pred`, `bbox_targets`, `bbox_weights`: `[num_anchors, 4]`
    /// - `labels`, `label_weights`: `[num_anchors]`
    ///
    /// # Panics
    ///
    /// Panics when the image has no positive anchors, no negatives are
    /// available for mining, or `num_total_samples` is zero — all of which
    /// signal an upstream assignment bug rather than a recoverable state.
    pub fn forward(
        &self,
        cls_score: Tensor<B, 2>,
        bbox_pred: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        label_weights: Tensor<B, 1>,
        bbox_targets: Tensor<B, 2>,
        bbox_weights: Tensor<B, 2>,
        num_total_samples: usize,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let loss_cls_all = cross_entropy_none(cls_score, labels.clone()) * label_weights;

        let pos_mask = labels.clone().greater_elem(0);
        let neg_mask = labels.equal_elem(0);
        let num_pos = pos_mask.clone().int().sum().into_scalar().to_i32() as usize;
        let num_neg_available = neg_mask.clone().int().sum().into_scalar().to_i32() as usize;

        assert!(
            num_pos > 0,
            "hard negative mining requires at least one positive anchor per image"
        );
        let num_neg = (self.neg_pos_ratio * num_pos).min(num_neg_available);
        assert!(num_neg > 0, "no negative anchors available for mining");
        assert!(num_total_samples > 0, "num_total_samples must be positive");

        let pos_inds = Tensor::cat(pos_mask.nonzero(), 0);
        let neg_inds = Tensor::cat(neg_mask.nonzero(), 0);

        let loss_cls_pos = loss_cls_all.clone().select(0, pos_inds).sum();
        let loss_cls_neg = loss_cls_all
            .select(0, neg_inds)
            .sort_descending(0)
            .slice([0..num_neg])
            .sum();
        let loss_cls = (loss_cls_pos + loss_cls_neg).div_scalar(num_total_samples as f64);

        let loss_bbox = self.smooth_l1.forward_weighted(
            bbox_pred,
            bbox_targets,
            bbox_weights,
            num_total_samples as f64,
        );

        (loss_cls, loss_bbox)
    }
}
