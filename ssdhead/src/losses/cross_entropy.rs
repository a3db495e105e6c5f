//! Per-anchor cross-entropy without reduction.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, Int},
};

/// Cross-entropy of `logits` against integer class labels, one loss value
/// per anchor.
///
/// Applies log-softmax over the class dimension and gathers the negative
/// log-likelihood of each anchor's assigned label, so labels need no one-hot
/// encoding.
///
/// # Shapes
/// - `logits`: `[num_anchors, num_classes]`
/// - `targets`: `[num_anchors]`, values in `0..num_classes`
/// - output: `[num_anchors]`
pub fn cross_entropy_none<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [num_anchors] = targets.dims();

    let log_probs = log_softmax(logits, 1);
    let nll = log_probs.gather(1, targets.reshape([num_anchors, 1])).neg();

    nll.reshape([num_anchors])
}
