//! # Detection head models
//!
//! - `head`: the multi-scale [`SsdHead`] tying anchors, prediction
//!   convolutions and the mining loss together.
//! - `modules`: the per-level prediction convolutions (dense and
//!   depthwise-separable variants).
//!
//! [`SsdHead`]: head::SsdHead

pub mod head;
pub mod modules;

pub use head::{SsdHead, SsdHeadLosses};
