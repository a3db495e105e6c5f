//! Base anchor generation and replication over feature-map grids.

use burn::{
    prelude::*,
    tensor::{Bool, TensorData},
};

/// One anchor box in `(x1, y1, x2, y2)` corner form.
///
/// Boxes use the half-open pixel convention: a box of width `w` centered on
/// `c` spans `c - (w - 1) / 2 ..= c + (w - 1) / 2`, so its center is exactly
/// `c` regardless of scale or ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseAnchor {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BaseAnchor {
    fn centered(ctr: (f64, f64), width: f64, height: f64) -> Self {
        let (cx, cy) = ctr;
        Self {
            x1: cx - 0.5 * (width - 1.0),
            y1: cy - 0.5 * (height - 1.0),
            x2: cx + 0.5 * (width - 1.0),
            y2: cy + 0.5 * (height - 1.0),
        }
    }

    /// Box center.
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Box width in pixels.
    pub fn width(&self) -> f64 {
        self.x2 - self.x1 + 1.0
    }

    /// Box height in pixels.
    pub fn height(&self) -> f64 {
        self.y2 - self.y1 + 1.0
    }
}

/// Generates the ordered base anchors of one feature level and replicates
/// them across the level's spatial grid.
///
/// The base anchor order is load-bearing: the assigner and the loss index
/// anchors positionally, so both construction paths fix a canonical order at
/// build time and never reorder afterwards.
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    base_anchors: Vec<BaseAnchor>,
}

impl AnchorGenerator {
    /// Builds SSD base anchors from `(base_size, scales, ratios)`.
    ///
    /// The first scale is crossed with every ratio (ratios varying fastest);
    /// each extra scale contributes only its unit-ratio anchor. The anchor
    /// for `(scales[1], ratio 1.0)` is then moved from its natural last
    /// position to index 1, giving the canonical order
    /// `[r=1@s0, r=1@s1, 1/a, a, 1/b, b, ...]`.
    pub fn ssd(base_size: f64, scales: &[f64], ratios: &[f64], ctr: (f64, f64)) -> Self {
        let mut base_anchors: Vec<BaseAnchor> = ratios
            .iter()
            .map(|&ratio| Self::scaled_box(base_size, scales[0], ratio, ctr))
            .collect();
        for &scale in &scales[1..] {
            base_anchors.push(Self::scaled_box(base_size, scale, ratios[0], ctr));
        }

        // Canonical SSD order: the extra-scale unit-ratio anchor sits at
        // index 1, directly after the base unit-ratio anchor.
        if base_anchors.len() > ratios.len() {
            let extra = base_anchors.remove(ratios.len());
            base_anchors.insert(1, extra);
        }

        Self { base_anchors }
    }

    /// Builds base anchors from explicit width/height tables, in table order.
    pub fn explicit(widths: &[f64], heights: &[f64], ctr: (f64, f64)) -> Self {
        let base_anchors = widths
            .iter()
            .zip(heights)
            .map(|(&w, &h)| BaseAnchor::centered(ctr, w, h))
            .collect();
        Self { base_anchors }
    }

    fn scaled_box(base_size: f64, scale: f64, ratio: f64, ctr: (f64, f64)) -> BaseAnchor {
        let h_ratio = ratio.sqrt();
        let w_ratio = 1.0 / h_ratio;
        BaseAnchor::centered(
            ctr,
            base_size * scale * w_ratio,
            base_size * scale * h_ratio,
        )
    }

    /// The ordered base anchors of this level.
    pub fn base_anchors(&self) -> &[BaseAnchor] {
        &self.base_anchors
    }

    /// Anchors per spatial location.
    pub fn num_base_anchors(&self) -> usize {
        self.base_anchors.len()
    }

    /// Replicates the base anchors over a `(feat_h, feat_w)` grid.
    ///
    /// Output shape is `[feat_h * feat_w * num_base_anchors, 4]`, row-major
    /// over locations with base anchors innermost; this ordering must match
    /// the flattening applied to the prediction maps.
    pub fn grid_anchors<B: Backend>(
        &self,
        featmap_size: (usize, usize),
        stride: (usize, usize),
        device: &Device<B>,
    ) -> Tensor<B, 2> {
        let (feat_h, feat_w) = featmap_size;
        let (stride_x, stride_y) = stride;
        let num_anchors = feat_h * feat_w * self.base_anchors.len();

        let mut data = Vec::with_capacity(num_anchors * 4);
        for y in 0..feat_h {
            let shift_y = (y * stride_y) as f64;
            for x in 0..feat_w {
                let shift_x = (x * stride_x) as f64;
                for anchor in &self.base_anchors {
                    data.push((anchor.x1 + shift_x) as f32);
                    data.push((anchor.y1 + shift_y) as f32);
                    data.push((anchor.x2 + shift_x) as f32);
                    data.push((anchor.y2 + shift_y) as f32);
                }
            }
        }

        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([num_anchors, 4])
    }

    /// Marks the anchors whose grid location falls inside the valid
    /// (unpadded) region of the feature map.
    pub fn valid_flags<B: Backend>(
        &self,
        featmap_size: (usize, usize),
        valid_size: (usize, usize),
        device: &Device<B>,
    ) -> Tensor<B, 1, Bool> {
        let (feat_h, feat_w) = featmap_size;
        let (valid_h, valid_w) = valid_size;
        let num_anchors = feat_h * feat_w * self.base_anchors.len();

        let mut flags = Vec::with_capacity(num_anchors);
        for y in 0..feat_h {
            for x in 0..feat_w {
                let valid = x < valid_w && y < valid_h;
                flags.extend(std::iter::repeat(valid).take(self.base_anchors.len()));
            }
        }

        Tensor::from_bool(TensorData::new(flags, [num_anchors]), device)
    }
}
