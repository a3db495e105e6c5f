//! Per-level prediction convolutions.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::{config::HeadActivation, special::Relu6};

/// Configuration for a [`PredictionConv`].
#[derive(Config, Debug)]
pub struct PredictionConvConfig {
    in_channels: usize,
    out_channels: usize,
    /// Build the depthwise-separable variant instead of a dense 3x3.
    #[config(default = "false")]
    depthwise: bool,
    /// Rectifier inside the depthwise variant.
    #[config(default = "HeadActivation::Relu6")]
    activation: HeadActivation,
}

impl PredictionConvConfig {
    /// Initializes a [`PredictionConv`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PredictionConv<B> {
        if self.depthwise {
            let conv_dw = xavier_conv(
                Conv2dConfig::new([self.in_channels, self.in_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_groups(self.in_channels),
                device,
            );
            let bn = BatchNormConfig::new(self.in_channels).init(device);
            let act = match self.activation {
                HeadActivation::Relu => Rectifier::Uncapped(Relu::new()),
                HeadActivation::Relu6 => Rectifier::Capped(Relu6::new()),
            };
            let conv_pw = xavier_conv(
                Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1]),
                device,
            );
            PredictionConv::Depthwise(DepthwiseConv {
                conv_dw,
                bn,
                act,
                conv_pw,
            })
        } else {
            PredictionConv::Dense(xavier_conv(
                Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1)),
                device,
            ))
        }
    }
}

/// Xavier-uniform weights with zeroed bias, the SSD head initialization.
fn xavier_conv<B: Backend>(config: Conv2dConfig, device: &Device<B>) -> Conv2d<B> {
    let mut conv = config
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device);
    conv.bias = conv
        .bias
        .map(|bias| Param::from_tensor(bias.val().zeros_like()));
    conv
}

/// Rectifier inside the depthwise variant, chosen at construction.
#[derive(Module, Debug)]
pub enum Rectifier<B: Backend> {
    Uncapped(Relu),
    Capped(Relu6<B>),
}

impl<B: Backend> Rectifier<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Uncapped(relu) => relu.forward(x),
            Self::Capped(relu6) => relu6.forward(x),
        }
    }
}

/// A grouped 3x3 spatial transform followed by normalization, rectification
/// and a 1x1 pointwise projection to the output channel count.
#[derive(Module, Debug)]
pub struct DepthwiseConv<B: Backend> {
    conv_dw: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    act: Rectifier<B>,
    conv_pw: Conv2d<B>,
}

impl<B: Backend> DepthwiseConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_dw.forward(x);
        let x = self.bn.forward(x);
        let x = self.act.forward(x);
        self.conv_pw.forward(x)
    }
}

/// One prediction transform of the head, dense or depthwise-separable.
///
/// Both variants map a `[N, in_channels, H, W]` feature map to
/// `[N, out_channels, H, W]` with a 3x3 receptive field; the variant is
/// fixed when the head is built.
#[derive(Module, Debug)]
pub enum PredictionConv<B: Backend> {
    Dense(Conv2d<B>),
    Depthwise(DepthwiseConv<B>),
}

impl<B: Backend> PredictionConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Dense(conv) => conv.forward(x),
            Self::Depthwise(conv) => conv.forward(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_dense_output_shape() {
        let device = Default::default();
        let conv = PredictionConvConfig::new(16, 24).init::<Backend>(&device);

        let x = Tensor::<Backend, 4>::zeros([2, 16, 5, 7], &device);
        assert_eq!(conv.forward(x).dims(), [2, 24, 5, 7]);
    }

    #[test]
    fn test_depthwise_output_shape_matches_dense() {
        let device = Default::default();
        let dense = PredictionConvConfig::new(16, 24).init::<Backend>(&device);
        let depthwise = PredictionConvConfig::new(16, 24)
            .with_depthwise(true)
            .init::<Backend>(&device);

        let x = Tensor::<Backend, 4>::random(
            [1, 16, 4, 4],
            burn::tensor::Distribution::Default,
            &device,
        );
        assert_eq!(
            dense.forward(x.clone()).dims(),
            depthwise.forward(x).dims()
        );
    }

    #[test]
    fn test_depthwise_uncapped_activation_variant() {
        let device = Default::default();
        let conv = PredictionConvConfig::new(8, 12)
            .with_depthwise(true)
            .with_activation(HeadActivation::Relu)
            .init::<Backend>(&device);

        let x = Tensor::<Backend, 4>::zeros([1, 8, 3, 3], &device);
        assert_eq!(conv.forward(x).dims(), [1, 12, 3, 3]);
    }

    #[test]
    fn test_bias_starts_at_zero() {
        let device = Default::default();
        let conv = PredictionConvConfig::new(4, 8).init::<Backend>(&device);

        let PredictionConv::Dense(inner) = conv else {
            panic!("expected the dense variant");
        };
        let bias = inner.bias.expect("dense head keeps its bias").val();
        assert_eq!(bias.clone().abs().sum().into_scalar(), 0.0);
    }
}
