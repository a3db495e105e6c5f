//! The anchor-to-ground-truth assignment seam.
//!
//! Matching, sampling and target encoding are owned by an external assigner;
//! the head only fixes the interface: anchors and validity flags go in,
//! per-anchor training targets come out.

use burn::{
    prelude::*,
    tensor::{Bool, Int},
};

use crate::config::TargetEncodeConfig;

/// Per-image metadata consumed for anchor validity and assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    /// Image shape after resizing, `(height, width)` in pixels.
    pub img_shape: (usize, usize),
    /// Image shape after padding, `(height, width)` in pixels.
    pub pad_shape: (usize, usize),
}

/// Batched per-anchor training targets produced by an [`Assigner`].
///
/// Anchor ordering matches the head's flattened prediction ordering:
/// levels in configuration order, locations row-major, base anchors
/// innermost.
///
/// Invariants the loss relies on: ignored background anchors carry
/// `label_weights == 0`, and no anchor has a nonzero `bbox_weights` row
/// while its label is 0.
#[derive(Debug, Clone)]
pub struct TargetAssignment<B: Backend> {
    /// Assigned class labels, `[num_images, num_anchors]`; 0 is background.
    pub labels: Tensor<B, 2, Int>,
    /// Per-anchor classification weights, `[num_images, num_anchors]`.
    pub label_weights: Tensor<B, 2>,
    /// Encoded regression targets, `[num_images, num_anchors, 4]`.
    pub bbox_targets: Tensor<B, 3>,
    /// Per-coordinate regression weights, `[num_images, num_anchors, 4]`.
    pub bbox_weights: Tensor<B, 3>,
    /// Positive anchors across the whole batch.
    pub num_total_pos: usize,
    /// Negative anchors across the whole batch.
    pub num_total_neg: usize,
}

/// Matches anchors against ground truth and encodes regression targets.
///
/// Returning `None` signals that the batch produced no usable assignment
/// (for example, zero valid anchors); the caller skips the loss for that
/// batch rather than treating it as an error.
pub trait Assigner<B: Backend> {
    fn assign(
        &self,
        anchors: &[Vec<Tensor<B, 2>>],
        valid_flags: &[Vec<Tensor<B, 1, Bool>>],
        gt_bboxes: &[Tensor<B, 2>],
        gt_labels: &[Tensor<B, 1, Int>],
        img_metas: &[ImageMeta],
        target_encode: &TargetEncodeConfig,
    ) -> Option<TargetAssignment<B>>;
}
