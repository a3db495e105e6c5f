//! The multi-scale SSD detection head.

use burn::{
    module::Ignored,
    prelude::*,
    tensor::{cast::ToElement, Bool, Int},
};

use crate::{
    anchors::{derive_level_scales, AnchorGenerator},
    assigner::{Assigner, ImageMeta, TargetAssignment},
    config::{AnchorLayout, SsdHeadConfig, Stride, TargetEncodeConfig},
    error::SsdHeadResult,
    losses::{HardNegativeMiningLoss, UncertaintyLossBalancer, UncertaintyLossBalancerConfig},
    models::modules::{PredictionConv, PredictionConvConfig},
};

impl SsdHeadConfig {
    /// Initializes an [`SsdHead`], resolving the anchor layout into concrete
    /// per-level generators and building one classifier/regressor pair per
    /// feature level.
    ///
    /// # Errors
    ///
    /// Returns any error produced by [`SsdHeadConfig::validate`] or by the
    /// per-level scale derivation.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SsdHeadResult<SsdHead<B>> {
        self.validate()?;

        let anchor_generators: Vec<AnchorGenerator> = match &self.anchor_layout {
            AnchorLayout::Derived(derived) => {
                let levels = derive_level_scales(
                    self.num_levels(),
                    self.input_size,
                    derived.basesize_ratio_range,
                    &derived.ratios,
                )?;
                levels
                    .iter()
                    .zip(self.anchor_strides.iter())
                    .map(|(level, stride)| {
                        AnchorGenerator::ssd(
                            level.base_size,
                            &level.scales,
                            &level.ratios,
                            stride.center(),
                        )
                    })
                    .collect()
            }
            AnchorLayout::Explicit(explicit) => explicit
                .widths
                .iter()
                .zip(&explicit.heights)
                .zip(self.anchor_strides.iter())
                .map(|((widths, heights), stride)| {
                    AnchorGenerator::explicit(widths, heights, stride.center())
                })
                .collect(),
        };

        let mut cls_convs = Vec::with_capacity(self.num_levels());
        let mut reg_convs = Vec::with_capacity(self.num_levels());
        for (&in_channels, generator) in self.in_channels.iter().zip(&anchor_generators) {
            let num_anchors = generator.num_base_anchors();
            cls_convs.push(
                PredictionConvConfig::new(in_channels, num_anchors * self.num_classes)
                    .with_depthwise(self.depthwise_heads)
                    .with_activation(self.depthwise_heads_activation.clone())
                    .init(device),
            );
            reg_convs.push(
                PredictionConvConfig::new(in_channels, num_anchors * 4)
                    .with_depthwise(self.depthwise_heads)
                    .with_activation(self.depthwise_heads_activation.clone())
                    .init(device),
            );
        }

        let balancer = self
            .loss_balancing
            .then(|| UncertaintyLossBalancerConfig::new().init(device));

        tracing::info!(
            levels = self.num_levels(),
            classes = self.num_classes,
            depthwise = self.depthwise_heads,
            balanced = self.loss_balancing,
            "initialized SSD detection head"
        );

        Ok(SsdHead {
            cls_convs,
            reg_convs,
            mining_loss: self.loss.init(),
            balancer,
            anchor_generators: Ignored(anchor_generators),
            anchor_strides: Ignored(self.anchor_strides.clone()),
            target_encode: Ignored(self.target_encode.clone()),
            num_classes: self.num_classes,
        })
    }
}

/// Per-image detection losses.
///
/// With loss balancing enabled each list collapses to a single weighted
/// scalar; otherwise entries are per-image.
#[derive(Debug, Clone)]
pub struct SsdHeadLosses<B: Backend> {
    pub loss_cls: Vec<Tensor<B, 1>>,
    pub loss_bbox: Vec<Tensor<B, 1>>,
}

impl<B: Backend> SsdHeadLosses<B> {
    /// Sum of every loss term, for a single backward pass.
    pub fn total(&self) -> Tensor<B, 1> {
        let device = self.loss_cls[0].device();
        self.loss_cls
            .iter()
            .chain(&self.loss_bbox)
            .fold(Tensor::zeros([1], &device), |acc, loss| acc + loss.clone())
    }
}

/// Multi-scale SSD detection head.
///
/// Owns one classification and one regression transform per feature level,
/// the per-level anchor generators, and the mining loss. Anchor ordering is
/// shared between [`SsdHead::anchors`] and the flattening in
/// [`SsdHead::loss`]; the assigner sees and must preserve the same order.
#[derive(Module, Debug)]
pub struct SsdHead<B: Backend> {
    cls_convs: Vec<PredictionConv<B>>,
    reg_convs: Vec<PredictionConv<B>>,
    mining_loss: HardNegativeMiningLoss<B>,
    balancer: Option<UncertaintyLossBalancer<B>>,
    anchor_generators: Ignored<Vec<AnchorGenerator>>,
    anchor_strides: Ignored<Vec<Stride>>,
    target_encode: Ignored<TargetEncodeConfig>,
    num_classes: usize,
}

impl<B: Backend> SsdHead<B> {
    /// Applies the per-level classifiers and regressors.
    ///
    /// Returns one `(score_map, offset_map)` pair per level, in level order:
    /// `[N, A*num_classes, H, W]` and `[N, A*4, H, W]`.
    pub fn forward(&self, feats: Vec<Tensor<B, 4>>) -> Vec<(Tensor<B, 4>, Tensor<B, 4>)> {
        assert_eq!(
            feats.len(),
            self.cls_convs.len(),
            "expected one feature map per level"
        );
        feats
            .into_iter()
            .zip(self.cls_convs.iter().zip(self.reg_convs.iter()))
            .map(|(feat, (cls_conv, reg_conv))| {
                let scores = cls_conv.forward(feat.clone());
                let offsets = reg_conv.forward(feat);
                (scores, offsets)
            })
            .collect()
    }

    /// Anchors per spatial location at each level.
    pub fn num_anchors_per_level(&self) -> Vec<usize> {
        self.anchor_generators
            .iter()
            .map(AnchorGenerator::num_base_anchors)
            .collect()
    }

    /// Replicates anchors over the given feature-map grids for every image.
    ///
    /// Returns `(anchors, valid_flags)` indexed `[image][level]`. Anchors
    /// are identical across images; validity flags depend on each image's
    /// padded shape.
    pub fn anchors(
        &self,
        featmap_sizes: &[(usize, usize)],
        img_metas: &[ImageMeta],
        device: &Device<B>,
    ) -> (Vec<Vec<Tensor<B, 2>>>, Vec<Vec<Tensor<B, 1, Bool>>>) {
        assert_eq!(
            featmap_sizes.len(),
            self.anchor_generators.len(),
            "expected one feature-map size per level"
        );

        let multi_level_anchors: Vec<Tensor<B, 2>> = self
            .anchor_generators
            .iter()
            .zip(self.anchor_strides.iter())
            .zip(featmap_sizes)
            .map(|((generator, stride), &featmap_size)| {
                generator.grid_anchors(featmap_size, (stride.x, stride.y), device)
            })
            .collect();
        let anchor_list = img_metas
            .iter()
            .map(|_| multi_level_anchors.clone())
            .collect();

        let valid_flag_list = img_metas
            .iter()
            .map(|meta| {
                let (pad_h, pad_w) = meta.pad_shape;
                self.anchor_generators
                    .iter()
                    .zip(self.anchor_strides.iter())
                    .zip(featmap_sizes)
                    .map(|((generator, stride), &(feat_h, feat_w))| {
                        let valid_h = pad_h.div_ceil(stride.y).min(feat_h);
                        let valid_w = pad_w.div_ceil(stride.x).min(feat_w);
                        generator.valid_flags((feat_h, feat_w), (valid_h, valid_w), device)
                    })
                    .collect()
            })
            .collect();

        (anchor_list, valid_flag_list)
    }

    /// Computes the detection loss for a batch.
    ///
    /// Score and offset maps come from [`SsdHead::forward`]; anchors are
    /// regenerated for the observed feature-map sizes and handed to the
    /// assigner together with the ground truth. Returns `None` when the
    /// assigner produces no usable assignment for the batch, which callers
    /// skip rather than treat as an error.
    ///
    /// # Panics
    ///
    /// Panics when the aggregated scores or offsets contain non-finite
    /// values, or when an image ends up without positive anchors — both
    /// indicate upstream bugs and must halt training.
    pub fn loss<A: Assigner<B>>(
        &self,
        cls_scores: &[Tensor<B, 4>],
        bbox_preds: &[Tensor<B, 4>],
        gt_bboxes: &[Tensor<B, 2>],
        gt_labels: &[Tensor<B, 1, Int>],
        img_metas: &[ImageMeta],
        assigner: &A,
    ) -> Option<SsdHeadLosses<B>> {
        assert_eq!(
            cls_scores.len(),
            self.anchor_generators.len(),
            "expected one score map per level"
        );
        assert_eq!(
            cls_scores.len(),
            bbox_preds.len(),
            "score and offset maps must pair up"
        );

        let featmap_sizes: Vec<(usize, usize)> = cls_scores
            .iter()
            .map(|score| {
                let [_, _, h, w] = score.dims();
                (h, w)
            })
            .collect();
        let device = cls_scores[0].device();

        let (anchor_list, valid_flag_list) = self.anchors(&featmap_sizes, img_metas, &device);
        let Some(targets) = assigner.assign(
            &anchor_list,
            &valid_flag_list,
            gt_bboxes,
            gt_labels,
            img_metas,
            &self.target_encode,
        ) else {
            tracing::debug!("no usable anchor assignment, skipping loss for this batch");
            return None;
        };
        let TargetAssignment {
            labels,
            label_weights,
            bbox_targets,
            bbox_weights,
            num_total_pos,
            ..
        } = targets;

        let num_images = img_metas.len();
        let all_cls_scores = Tensor::cat(
            cls_scores
                .iter()
                .map(|score| {
                    let [n, channels, h, w] = score.dims();
                    score
                        .clone()
                        .permute([0, 2, 3, 1])
                        .reshape([n, h * w * (channels / self.num_classes), self.num_classes])
                })
                .collect::<Vec<_>>(),
            1,
        );
        let all_bbox_preds = Tensor::cat(
            bbox_preds
                .iter()
                .map(|pred| {
                    let [n, channels, h, w] = pred.dims();
                    pred.clone()
                        .permute([0, 2, 3, 1])
                        .reshape([n, h * w * (channels / 4), 4])
                })
                .collect::<Vec<_>>(),
            1,
        );

        assert_all_finite(&all_cls_scores, "classification scores");
        assert_all_finite(&all_bbox_preds, "bbox predictions");

        let mut losses_cls = Vec::with_capacity(num_images);
        let mut losses_bbox = Vec::with_capacity(num_images);
        for i in 0..num_images {
            let cls_score: Tensor<B, 2> = all_cls_scores.clone().slice([i..i + 1]).squeeze(0);
            let bbox_pred: Tensor<B, 2> = all_bbox_preds.clone().slice([i..i + 1]).squeeze(0);
            let image_labels: Tensor<B, 1, Int> = labels.clone().slice([i..i + 1]).squeeze(0);
            let image_label_weights: Tensor<B, 1> =
                label_weights.clone().slice([i..i + 1]).squeeze(0);
            let image_bbox_targets: Tensor<B, 2> =
                bbox_targets.clone().slice([i..i + 1]).squeeze(0);
            let image_bbox_weights: Tensor<B, 2> =
                bbox_weights.clone().slice([i..i + 1]).squeeze(0);

            let (loss_cls, loss_bbox) = self.mining_loss.forward(
                cls_score,
                bbox_pred,
                image_labels,
                image_label_weights,
                image_bbox_targets,
                image_bbox_weights,
                num_total_pos,
            );
            losses_cls.push(loss_cls);
            losses_bbox.push(loss_bbox);
        }

        Some(match &self.balancer {
            Some(balancer) => {
                let (loss_cls, loss_bbox) = balancer.forward(losses_cls, losses_bbox);
                SsdHeadLosses {
                    loss_cls: vec![loss_cls],
                    loss_bbox: vec![loss_bbox],
                }
            }
            None => SsdHeadLosses {
                loss_cls: losses_cls,
                loss_bbox: losses_bbox,
            },
        })
    }
}

/// Non-finite predictions poison gradients; halt instead of training on.
fn assert_all_finite<B: Backend, const D: usize>(tensor: &Tensor<B, D>, what: &str) {
    let non_finite = tensor.clone().is_nan().int().sum().into_scalar().to_i32()
        + tensor.clone().is_inf().int().sum().into_scalar().to_i32();
    assert!(non_finite == 0, "{what} became infinite or NaN");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DerivedAnchors, ExplicitAnchors};
    use burn::backend::NdArray;

    type Backend = NdArray<f32>;

    fn two_level_config() -> SsdHeadConfig {
        SsdHeadConfig::new(
            vec![8, 12],
            vec![Stride::square(8), Stride::square(16)],
            AnchorLayout::Explicit(ExplicitAnchors::new(
                vec![vec![16.0, 32.0], vec![32.0, 64.0]],
                vec![vec![16.0, 32.0], vec![32.0, 64.0]],
            )),
        )
        .with_num_classes(4)
        .with_input_size(32)
    }

    fn two_level_feats(device: &burn::tensor::Device<Backend>) -> Vec<Tensor<Backend, 4>> {
        vec![
            Tensor::zeros([1, 8, 4, 4], device),
            Tensor::zeros([1, 12, 2, 2], device),
        ]
    }

    struct OnePositiveAssigner;

    impl Assigner<Backend> for OnePositiveAssigner {
        fn assign(
            &self,
            anchors: &[Vec<Tensor<Backend, 2>>],
            _valid_flags: &[Vec<Tensor<Backend, 1, burn::tensor::Bool>>],
            _gt_bboxes: &[Tensor<Backend, 2>],
            _gt_labels: &[Tensor<Backend, 1, Int>],
            img_metas: &[ImageMeta],
            _target_encode: &TargetEncodeConfig,
        ) -> Option<TargetAssignment<Backend>> {
            let device = anchors[0][0].device();
            let num_images = img_metas.len();
            let num_anchors: usize = anchors[0].iter().map(|level| level.dims()[0]).sum();

            let mut labels = vec![0; num_anchors];
            labels[0] = 1;
            let labels = Tensor::<Backend, 1, Int>::from_ints(labels.as_slice(), &device)
                .reshape([1, num_anchors])
                .repeat_dim(0, num_images);

            let mut weights = vec![0.0_f32; num_anchors * 4];
            weights[..4].copy_from_slice(&[1.0; 4]);
            let bbox_weights = Tensor::<Backend, 1>::from_floats(weights.as_slice(), &device)
                .reshape([1, num_anchors, 4])
                .repeat_dim(0, num_images);

            Some(TargetAssignment {
                labels,
                label_weights: Tensor::ones([num_images, num_anchors], &device),
                bbox_targets: Tensor::zeros([num_images, num_anchors, 4], &device),
                bbox_weights,
                num_total_pos: num_images,
                num_total_neg: num_images * (num_anchors - 1),
            })
        }
    }

    struct EmptyAssigner;

    impl Assigner<Backend> for EmptyAssigner {
        fn assign(
            &self,
            _anchors: &[Vec<Tensor<Backend, 2>>],
            _valid_flags: &[Vec<Tensor<Backend, 1, burn::tensor::Bool>>],
            _gt_bboxes: &[Tensor<Backend, 2>],
            _gt_labels: &[Tensor<Backend, 1, Int>],
            _img_metas: &[ImageMeta],
            _target_encode: &TargetEncodeConfig,
        ) -> Option<TargetAssignment<Backend>> {
            None
        }
    }

    fn meta() -> ImageMeta {
        ImageMeta {
            img_shape: (32, 32),
            pad_shape: (32, 32),
        }
    }

    #[test]
    fn test_forward_output_shapes() {
        let device = Default::default();
        let head = two_level_config().init::<Backend>(&device).unwrap();

        let outputs = head.forward(two_level_feats(&device));
        assert_eq!(outputs.len(), 2);

        // 2 anchors per location, 4 classes.
        let (scores, offsets) = &outputs[0];
        assert_eq!(scores.dims(), [1, 2 * 4, 4, 4]);
        assert_eq!(offsets.dims(), [1, 2 * 4, 4, 4]);

        let (scores, offsets) = &outputs[1];
        assert_eq!(scores.dims(), [1, 2 * 4, 2, 2]);
        assert_eq!(offsets.dims(), [1, 2 * 4, 2, 2]);
    }

    #[test]
    fn test_derived_head_output_channels() {
        let device = Default::default();
        let config = SsdHeadConfig::new(
            vec![8, 8, 8],
            vec![Stride::square(8), Stride::square(16), Stride::square(32)],
            AnchorLayout::Derived(DerivedAnchors::new(
                (0.2, 0.9),
                vec![vec![2.0], vec![2.0, 3.0], vec![2.0]],
            )),
        )
        .with_num_classes(4)
        .with_input_size(300);
        let head = config.init::<Backend>(&device).unwrap();

        assert_eq!(head.num_anchors_per_level(), vec![4, 6, 4]);

        let feats = vec![
            Tensor::zeros([1, 8, 8, 8], &device),
            Tensor::zeros([1, 8, 4, 4], &device),
            Tensor::zeros([1, 8, 2, 2], &device),
        ];
        let outputs = head.forward(feats);
        assert_eq!(outputs[0].0.dims(), [1, 4 * 4, 8, 8]);
        assert_eq!(outputs[1].0.dims(), [1, 6 * 4, 4, 4]);
        assert_eq!(outputs[2].0.dims(), [1, 4 * 4, 2, 2]);
    }

    #[test]
    fn test_anchor_replication_counts() {
        let device = Default::default();
        let head = two_level_config().init::<Backend>(&device).unwrap();

        let (anchors, valid_flags) = head.anchors(&[(4, 4), (2, 2)], &[meta()], &device);
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0][0].dims(), [4 * 4 * 2, 4]);
        assert_eq!(anchors[0][1].dims(), [2 * 2 * 2, 4]);

        // Pad shape covers the whole grid, so every anchor is valid.
        let valid = valid_flags[0][0].clone().int().sum().into_scalar();
        assert_eq!(valid, 32);
    }

    #[test]
    fn test_loss_end_to_end() {
        let device = Default::default();
        let head = two_level_config().init::<Backend>(&device).unwrap();

        let outputs = head.forward(two_level_feats(&device));
        let (cls_scores, bbox_preds): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();

        let gt_bboxes = vec![Tensor::<Backend, 2>::from_floats(
            [[4.0, 4.0, 20.0, 20.0]],
            &device,
        )];
        let gt_labels = vec![Tensor::<Backend, 1, Int>::from_ints([1], &device)];

        let losses = head
            .loss(
                &cls_scores,
                &bbox_preds,
                &gt_bboxes,
                &gt_labels,
                &[meta()],
                &OnePositiveAssigner,
            )
            .expect("assignment is usable");

        assert_eq!(losses.loss_cls.len(), 1);
        assert_eq!(losses.loss_bbox.len(), 1);

        // Zero features and zero-initialized biases give uniform logits:
        // every anchor loses ln(num_classes). One positive plus three mined
        // negatives, normalized by one positive.
        let expected = 4.0 * (4.0_f32).ln();
        let got = losses.loss_cls[0].clone().into_scalar();
        assert!((got - expected).abs() < 1e-5, "got {got}, want {expected}");

        // Offsets and targets are both zero at the positive anchor.
        assert_eq!(losses.loss_bbox[0].clone().into_scalar(), 0.0);

        // total() folds both terms.
        let total = losses.total().into_scalar();
        assert!((total - expected).abs() < 1e-5);
    }

    #[test]
    fn test_loss_balancing_collapses_to_scalars() {
        let device = Default::default();
        let head = two_level_config()
            .with_loss_balancing(true)
            .init::<Backend>(&device)
            .unwrap();

        let outputs = head.forward(two_level_feats(&device));
        let (cls_scores, bbox_preds): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();

        let gt_bboxes = vec![Tensor::<Backend, 2>::from_floats(
            [[4.0, 4.0, 20.0, 20.0]],
            &device,
        )];
        let gt_labels = vec![Tensor::<Backend, 1, Int>::from_ints([1], &device)];

        let losses = head
            .loss(
                &cls_scores,
                &bbox_preds,
                &gt_bboxes,
                &gt_labels,
                &[meta()],
                &OnePositiveAssigner,
            )
            .expect("assignment is usable");

        assert_eq!(losses.loss_cls.len(), 1);
        assert_eq!(losses.loss_bbox.len(), 1);

        // Zero-initialized balancer weights leave the losses untouched.
        let expected = 4.0 * (4.0_f32).ln();
        let got = losses.loss_cls[0].clone().into_scalar();
        assert!((got - expected).abs() < 1e-5, "got {got}, want {expected}");
    }

    #[test]
    fn test_empty_assignment_skips_batch() {
        let device = Default::default();
        let head = two_level_config().init::<Backend>(&device).unwrap();

        let outputs = head.forward(two_level_feats(&device));
        let (cls_scores, bbox_preds): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();

        let losses = head.loss(
            &cls_scores,
            &bbox_preds,
            &[Tensor::zeros([1, 4], &device)],
            &[Tensor::<Backend, 1, Int>::from_ints([1], &device)],
            &[meta()],
            &EmptyAssigner,
        );
        assert!(losses.is_none());
    }

    #[test]
    #[should_panic(expected = "infinite or NaN")]
    fn test_non_finite_scores_halt_training() {
        let device = Default::default();
        let head = two_level_config().init::<Backend>(&device).unwrap();

        let outputs = head.forward(two_level_feats(&device));
        let (mut cls_scores, bbox_preds): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();
        cls_scores[0] = cls_scores[0].clone() * f32::NAN;

        let _ = head.loss(
            &cls_scores,
            &bbox_preds,
            &[Tensor::zeros([1, 4], &device)],
            &[Tensor::<Backend, 1, Int>::from_ints([1], &device)],
            &[meta()],
            &OnePositiveAssigner,
        );
    }
}
