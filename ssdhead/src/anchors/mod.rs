//! Anchor geometry: per-level scale derivation and base anchor generation.

pub mod generator;
pub mod scales;

pub use generator::{AnchorGenerator, BaseAnchor};
pub use scales::{derive_level_scales, LevelScales};
