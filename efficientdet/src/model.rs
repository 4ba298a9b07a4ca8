use crate::{
    cell::FusionPyramid,
    coarser::{CoarserLevels, CoarserLevelsInit},
    common::*,
    convert,
    segmentation::{SegmentationHead, SegmentationHeadInit},
    tower::{PredictionTower, PredictionTowerInit, TowerKind},
};
use model_config::EfficientDetConfig;

pub use detection_output::*;
pub use efficientdet_model::*;

mod efficientdet_model {
    use super::*;

    #[derive(Debug)]
    pub struct EfficientDet {
        config: EfficientDetConfig,
        backbone_channels: Vec<usize>,
        coarser: CoarserLevels,
        pyramid: FusionPyramid,
        class_net: PredictionTower,
        box_net: PredictionTower,
        seg_head: Option<SegmentationHead>,
    }

    impl EfficientDet {
        /// Builds the network for a backbone emitting one feature map per
        /// level starting at `min_level`, with `backbone_channels` listing
        /// their widths in ascending level order.
        pub fn from_config<'p, P>(
            config: &EfficientDetConfig,
            backbone_channels: &[usize],
            path: P,
        ) -> Result<Self>
        where
            P: Borrow<nn::Path<'p>>,
        {
            Self::from_config_opt(config, backbone_channels, false, path)
        }

        /// Like [EfficientDet::from_config], but `feature_only` skips the
        /// prediction convs and returns tower features instead.
        pub fn from_config_opt<'p, P>(
            config: &EfficientDetConfig,
            backbone_channels: &[usize],
            feature_only: bool,
            path: P,
        ) -> Result<Self>
        where
            P: Borrow<nn::Path<'p>>,
        {
            let path = path.borrow();
            config.validate()?;

            let EfficientDetConfig {
                min_level,
                max_level,
                fpn_num_filters,
                box_class_repeats,
                num_classes,
                separable_conv,
                act_type,
                survival_prob,
                conv_after_downsample,
                apply_bn_for_resampling,
                pooling_type,
                seg_num_classes,
                ..
            } = *config;
            let num_levels = config.num_levels();

            ensure_config!(
                !backbone_channels.is_empty(),
                "the backbone must provide at least one level"
            );
            ensure_config!(
                backbone_channels.len() <= num_levels,
                "the backbone provides {} levels, but levels {}..={} only span {}",
                backbone_channels.len(),
                min_level,
                max_level,
                num_levels
            );
            ensure_config!(
                backbone_channels.iter().all(|&c| c > 0),
                "backbone channel counts must be positive"
            );
            let native_max_level = min_level + backbone_channels.len() - 1;
            info!(
                "build EfficientDet on levels {}..={} with {} backbone levels",
                min_level,
                max_level,
                backbone_channels.len()
            );

            let coarser = CoarserLevelsInit {
                native_max_level,
                max_level,
                top_channels: *backbone_channels
                    .last()
                    .ok_or_else(|| format_err!("the backbone must provide at least one level"))?,
                num_filters: fpn_num_filters,
                apply_bn: apply_bn_for_resampling,
                conv_after_downsample,
                pool_kind: convert::pool_kind(pooling_type),
                batch_norm: Default::default(),
            }
            .build(path / "resample")?;

            let pyramid = FusionPyramid::new(
                path / "fpn_cells",
                config,
                &coarser.output_channels(backbone_channels),
            )?;
            ensure_config!(
                pyramid
                    .output_channels()
                    .iter()
                    .all(|&c| c == fpn_num_filters),
                "every level must be produced by a fusion node, but the output widths are {:?}",
                pyramid.output_channels()
            );

            let tower_init = |kind| PredictionTowerInit {
                kind,
                num_anchors: config.num_anchors(),
                num_filters: fpn_num_filters,
                min_level,
                num_levels,
                repeats: box_class_repeats,
                separable_conv,
                activation: act_type,
                survival_prob,
                feature_only,
                batch_norm: Default::default(),
            };
            let class_net =
                tower_init(TowerKind::Class { num_classes }).build(path / "class_net")?;
            let box_net = tower_init(TowerKind::Box).build(path / "box_net")?;

            let seg_head = seg_num_classes
                .map(|seg_num_classes| {
                    SegmentationHeadInit {
                        num_classes: seg_num_classes,
                        num_filters: fpn_num_filters,
                        num_levels,
                        activation: act_type,
                        batch_norm: Default::default(),
                    }
                    .build(path / "seg_head")
                })
                .transpose()?;

            Ok(Self {
                config: config.clone(),
                backbone_channels: backbone_channels.to_vec(),
                coarser,
                pyramid,
                class_net,
                box_net,
                seg_head,
            })
        }

        pub fn config(&self) -> &EfficientDetConfig {
            &self.config
        }

        pub fn pyramid(&self) -> &FusionPyramid {
            &self.pyramid
        }

        /// Extends the backbone features to the full level range and runs
        /// the fusion cells. Returns one map per level, each with
        /// `fpn_num_filters` channels.
        pub fn features_t(&self, backbone_features: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
            let expect = self.backbone_channels.len();
            ensure_config!(
                backbone_features.len() == expect,
                "expect {} backbone levels, but get {}",
                expect,
                backbone_features.len()
            );
            for (index, (xs, &channels)) in
                izip!(backbone_features, &self.backbone_channels).enumerate()
            {
                let (_b, c, _h, _w) = xs.size4()?;
                ensure!(
                    c as usize == channels,
                    "backbone level {} has {} channels, but {} is expected",
                    self.config.min_level + index,
                    c,
                    channels
                );
            }

            let features = self.coarser.forward_t(backbone_features, train)?;
            self.pyramid.forward_t(&features, train)
        }

        pub fn forward_t(
            &self,
            backbone_features: &[Tensor],
            train: bool,
        ) -> Result<DetectionOutput> {
            let features = self.features_t(backbone_features, train)?;
            let class_outputs = self.class_net.forward_t(&features, train)?;
            let box_outputs = self.box_net.forward_t(&features, train)?;
            let seg_output = self
                .seg_head
                .as_ref()
                .map(|head| head.forward_t(&features, train))
                .transpose()?;

            Ok(DetectionOutput {
                class_outputs,
                box_outputs,
                seg_output,
            })
        }
    }
}

mod detection_output {
    use super::*;

    /// Per-level predictions in ascending level order.
    #[derive(Debug, TensorLike)]
    pub struct DetectionOutput {
        /// Shape (B, num_classes × num_anchors, H, W) per level.
        pub class_outputs: Vec<Tensor>,
        /// Shape (B, 4 × num_anchors, H, W) per level.
        pub box_outputs: Vec<Tensor>,
        /// Shape (B, seg_num_classes, 2H₀, 2W₀) for the finest level H₀×W₀.
        pub seg_output: Option<Tensor>,
    }

    impl DetectionOutput {
        pub fn num_levels(&self) -> usize {
            self.class_outputs.len()
        }
    }
}
