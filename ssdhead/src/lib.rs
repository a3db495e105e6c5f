//! SSD multi-scale detection head for [Burn](https://burn.dev).
//!
//! Turns per-resolution feature maps into dense per-anchor class scores and
//! box offsets, and computes the SSD training loss: cross-entropy with hard
//! negative mining plus smooth-L1 regression, optionally balanced through
//! learned homoscedastic-uncertainty weights. Anchor matching and target
//! encoding are delegated to an external [`Assigner`].
//!
//! [`Assigner`]: assigner::Assigner

pub mod anchors;
pub mod assigner;
pub mod config;
pub mod error;
pub mod losses;
pub mod models;
pub mod special;


pub use anchors::{derive_level_scales, AnchorGenerator, BaseAnchor, LevelScales};
pub use assigner::{Assigner, ImageMeta, TargetAssignment};
pub use config::{
    AnchorLayout, DerivedAnchors, ExplicitAnchors, HeadActivation, SsdHeadConfig, Stride,
    TargetEncodeConfig,
};
pub use error::{SsdHeadError, SsdHeadResult};
pub use losses::{
    HardNegativeMiningLoss, HardNegativeMiningLossConfig, SmoothL1Loss, SmoothL1LossConfig,
    UncertaintyLossBalancer, UncertaintyLossBalancerConfig,
};
pub use models::{SsdHead, SsdHeadLosses};
