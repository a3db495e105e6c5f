//! # ReLU6
//!
//! The capped rectifier `min(max(x, 0), 6)`, matching PyTorch's `nn.ReLU6`.
//! Burn only provides the uncapped variant, so the cap is applied via clamp.

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

/// Rectified linear unit capped at 6.
#[derive(Module, Debug)]
pub struct Relu6<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> Default for Relu6<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Relu6<B> {
    /// Creates a new `Relu6` module.
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    /// Applies `clamp(x, 0, 6)` elementwise.
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        x.clamp(0.0, 6.0)
    }
}
