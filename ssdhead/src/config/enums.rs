//! Option types for the SSD head configuration.

use burn::prelude::*;

/// Per-level anchor stride in pixels, horizontal then vertical.
///
/// Square strides are the common case; rectangular feature grids supply
/// both axes.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct Stride {
    /// Horizontal stride.
    pub x: usize,
    /// Vertical stride.
    pub y: usize,
}

impl Stride {
    /// A square stride.
    pub const fn square(stride: usize) -> Self {
        Self {
            x: stride,
            y: stride,
        }
    }

    /// The anchor center tied to this stride, `(s - 1) / 2` per axis.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x as f64 - 1.0) / 2.0,
            (self.y as f64 - 1.0) / 2.0,
        )
    }
}

/// Rectifier used inside the depthwise prediction heads.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum HeadActivation {
    /// Uncapped rectification.
    Relu,
    /// Rectification capped at 6.
    Relu6,
}

/// Derived anchor geometry: per-level base sizes and scales computed from a
/// global base-size ratio range (the classic SSD recipe).
#[derive(Config, Debug)]
pub struct DerivedAnchors {
    /// `(min_ratio, max_ratio)` of the input size covered by base anchors.
    pub basesize_ratio_range: (f64, f64),
    /// Per-level aspect ratios; each `r` contributes anchors at `r` and `1/r`.
    pub ratios: Vec<Vec<f64>>,
}

/// Explicit anchor geometry: verbatim per-level width/height tables.
#[derive(Config, Debug)]
pub struct ExplicitAnchors {
    /// Per-level anchor widths in pixels.
    pub widths: Vec<Vec<f64>>,
    /// Per-level anchor heights in pixels, zipped with `widths`.
    pub heights: Vec<Vec<f64>>,
}

/// How base anchors are specified.
///
/// Resolved once at head construction into concrete per-level anchor lists;
/// downstream code never re-inspects which variant was used.
#[derive(Config, Debug)]
pub enum AnchorLayout {
    /// Scales derived from a base-size ratio range plus aspect ratios.
    Derived(DerivedAnchors),
    /// Width/height tables used verbatim.
    Explicit(ExplicitAnchors),
}
