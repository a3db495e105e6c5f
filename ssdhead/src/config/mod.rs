//! Configuration module for the SSD detection head.
//!
//! Organized into two submodules:
//! - `core`: the main head configuration and its validation
//! - `enums`: enumeration types and small option structs

pub mod core;
pub mod enums;

pub use core::{SsdHeadConfig, TargetEncodeConfig};
pub use enums::{AnchorLayout, DerivedAnchors, ExplicitAnchors, HeadActivation, Stride};
