//! Core configuration for the SSD detection head.

use burn::prelude::*;

use super::enums::{AnchorLayout, HeadActivation, Stride};
use crate::error::{SsdHeadError, SsdHeadResult};
use crate::losses::HardNegativeMiningLossConfig;

/// Regression target normalization, consumed by the anchor assigner.
///
/// The head carries these values but never applies them; target encoding is
/// owned by the assigner.
#[derive(Config, Debug)]
pub struct TargetEncodeConfig {
    /// Per-coordinate target means.
    #[config(default = "[0.0, 0.0, 0.0, 0.0]")]
    pub target_means: [f64; 4],
    /// Per-coordinate target standard deviations.
    #[config(default = "[1.0, 1.0, 1.0, 1.0]")]
    pub target_stds: [f64; 4],
}

/// Configuration for the multi-scale SSD detection head.
///
/// One classification and one regression transform is built per feature
/// level; anchors-per-location counts follow from `anchor_layout`.
#[derive(Config, Debug)]
pub struct SsdHeadConfig {
    /// Input channel count of each feature level.
    pub in_channels: Vec<usize>,
    /// Anchor stride of each feature level.
    pub anchor_strides: Vec<Stride>,
    /// Base anchor specification, derived or explicit.
    pub anchor_layout: AnchorLayout,
    /// Side length of the (square) network input, in pixels.
    #[config(default = "300")]
    pub input_size: usize,
    /// Number of classes including background (label 0).
    #[config(default = "81")]
    pub num_classes: usize,
    /// Regression target normalization, passed through to the assigner.
    #[config(default = "TargetEncodeConfig::new()")]
    pub target_encode: TargetEncodeConfig,
    /// Use depthwise-separable prediction heads instead of dense 3x3 ones.
    #[config(default = "false")]
    pub depthwise_heads: bool,
    /// Rectifier inside the depthwise heads.
    #[config(default = "HeadActivation::Relu6")]
    pub depthwise_heads_activation: HeadActivation,
    /// Learn a homoscedastic-uncertainty weighting between the two loss terms.
    #[config(default = "false")]
    pub loss_balancing: bool,
    /// Hard-negative-mining loss settings.
    #[config(default = "HardNegativeMiningLossConfig::new()")]
    pub loss: HardNegativeMiningLossConfig,
}

impl SsdHeadConfig {
    /// Number of feature levels.
    pub fn num_levels(&self) -> usize {
        self.in_channels.len()
    }

    /// Anchors per spatial location at each level.
    ///
    /// `2 * len(ratios) + 2` on the derived path, `len(widths)` on the
    /// explicit path.
    pub fn num_anchors_per_level(&self) -> Vec<usize> {
        match &self.anchor_layout {
            AnchorLayout::Derived(derived) => {
                derived.ratios.iter().map(|r| 2 * r.len() + 2).collect()
            }
            AnchorLayout::Explicit(explicit) => explicit.widths.iter().map(Vec::len).collect(),
        }
    }

    /// Validate the configuration, failing fast on inconsistent settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(SsdHeadError::MismatchedLevels)` when per-level option
    /// lists disagree and `Err(SsdHeadError::InvalidConfiguration)` for any
    /// other logically invalid setting.
    pub fn validate(&self) -> SsdHeadResult<()> {
        let num_levels = self.num_levels();
        if num_levels == 0 {
            return Err(SsdHeadError::InvalidConfiguration {
                reason: "at least one feature level is required".to_string(),
            });
        }
        if self.num_classes < 2 {
            return Err(SsdHeadError::InvalidConfiguration {
                reason: format!(
                    "num_classes counts the background class and must be >= 2, got {}",
                    self.num_classes
                ),
            });
        }
        if self.anchor_strides.len() != num_levels {
            return Err(SsdHeadError::MismatchedLevels {
                what: "anchor_strides".to_string(),
                expected: num_levels,
                actual: self.anchor_strides.len(),
            });
        }
        if let Some(stride) = self.anchor_strides.iter().find(|s| s.x == 0 || s.y == 0) {
            return Err(SsdHeadError::InvalidConfiguration {
                reason: format!("anchor strides must be positive, got {stride:?}"),
            });
        }

        match &self.anchor_layout {
            AnchorLayout::Derived(derived) => {
                if derived.ratios.len() != num_levels {
                    return Err(SsdHeadError::MismatchedLevels {
                        what: "anchor ratios".to_string(),
                        expected: num_levels,
                        actual: derived.ratios.len(),
                    });
                }
                if num_levels < 3 {
                    return Err(SsdHeadError::InvalidConfiguration {
                        reason: format!(
                            "derived anchor scales need at least 3 levels, got {num_levels}; \
                             supply explicit widths/heights instead"
                        ),
                    });
                }
                let (min_ratio, max_ratio) = derived.basesize_ratio_range;
                if !(min_ratio > 0.0 && min_ratio < max_ratio && max_ratio <= 1.0) {
                    return Err(SsdHeadError::InvalidConfiguration {
                        reason: format!(
                            "basesize_ratio_range must satisfy 0 < min < max <= 1, \
                             got ({min_ratio}, {max_ratio})"
                        ),
                    });
                }
                if derived
                    .ratios
                    .iter()
                    .any(|level| level.iter().any(|&r| r <= 0.0))
                {
                    return Err(SsdHeadError::InvalidConfiguration {
                        reason: "anchor ratios must be positive".to_string(),
                    });
                }
            }
            AnchorLayout::Explicit(explicit) => {
                if explicit.widths.len() != num_levels {
                    return Err(SsdHeadError::MismatchedLevels {
                        what: "anchor widths".to_string(),
                        expected: num_levels,
                        actual: explicit.widths.len(),
                    });
                }
                if explicit.heights.len() != num_levels {
                    return Err(SsdHeadError::MismatchedLevels {
                        what: "anchor heights".to_string(),
                        expected: num_levels,
                        actual: explicit.heights.len(),
                    });
                }
                for (level, (widths, heights)) in
                    explicit.widths.iter().zip(&explicit.heights).enumerate()
                {
                    if widths.len() != heights.len() {
                        return Err(SsdHeadError::InvalidConfiguration {
                            reason: format!(
                                "level {level}: {} anchor widths vs {} heights",
                                widths.len(),
                                heights.len()
                            ),
                        });
                    }
                    if widths.is_empty() {
                        return Err(SsdHeadError::InvalidConfiguration {
                            reason: format!("level {level}: empty anchor table"),
                        });
                    }
                }
            }
        }

        if self.loss.neg_pos_ratio == 0 {
            return Err(SsdHeadError::InvalidConfiguration {
                reason: "neg_pos_ratio must be positive".to_string(),
            });
        }
        if self.loss.smoothl1_beta <= 0.0 {
            return Err(SsdHeadError::InvalidConfiguration {
                reason: format!(
                    "smoothl1_beta must be positive, got {}",
                    self.loss.smoothl1_beta
                ),
            });
        }

        Ok(())
    }
}
