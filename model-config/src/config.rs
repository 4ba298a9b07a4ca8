use crate::{common::*, error::parse_tag, topology::FpnTopology};
use tch_act::Activation;

pub use fpn_layout::*;
pub use efficientdet_config::*;
pub use pooling_type::*;
pub use precision::*;
pub use weight_method::*;

mod efficientdet_config {
    use super::*;

    /// Options of the feature network and prediction heads.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EfficientDetConfig {
        #[serde(default = "default_min_level")]
        pub min_level: usize,
        #[serde(default = "default_max_level")]
        pub max_level: usize,
        #[serde(default = "default_fpn_num_filters")]
        pub fpn_num_filters: usize,
        #[serde(default = "default_fpn_cell_repeats")]
        pub fpn_cell_repeats: usize,
        /// Falls back to the topology's own default when unset.
        #[serde(default)]
        pub fpn_weight_method: Option<WeightMethod>,
        #[serde(default)]
        pub fpn: FpnLayout,
        #[serde(default = "default_box_class_repeats")]
        pub box_class_repeats: usize,
        #[serde(default = "default_num_classes")]
        pub num_classes: usize,
        #[serde(default = "default_num_scales")]
        pub num_scales: usize,
        #[serde(default = "default_aspect_ratios")]
        pub aspect_ratios: Vec<R64>,
        #[serde(default = "default_true")]
        pub separable_conv: bool,
        #[serde(default)]
        pub act_type: Activation,
        #[serde(default)]
        pub survival_prob: Option<R64>,
        #[serde(default)]
        pub conv_after_downsample: bool,
        #[serde(default)]
        pub conv_bn_act_pattern: bool,
        #[serde(default = "default_true")]
        pub apply_bn_for_resampling: bool,
        #[serde(default)]
        pub pooling_type: PoolingType,
        /// Enables the segmentation head with this many classes.
        #[serde(default)]
        pub seg_num_classes: Option<usize>,
        #[serde(default)]
        pub precision: Precision,
    }

    impl Default for EfficientDetConfig {
        fn default() -> Self {
            Self {
                min_level: default_min_level(),
                max_level: default_max_level(),
                fpn_num_filters: default_fpn_num_filters(),
                fpn_cell_repeats: default_fpn_cell_repeats(),
                fpn_weight_method: None,
                fpn: FpnLayout::default(),
                box_class_repeats: default_box_class_repeats(),
                num_classes: default_num_classes(),
                num_scales: default_num_scales(),
                aspect_ratios: default_aspect_ratios(),
                separable_conv: true,
                act_type: Activation::default(),
                survival_prob: None,
                conv_after_downsample: false,
                conv_bn_act_pattern: false,
                apply_bn_for_resampling: true,
                pooling_type: PoolingType::default(),
                seg_num_classes: None,
                precision: Precision::default(),
            }
        }
    }

    impl EfficientDetConfig {
        /// Loads and validates a json5 configuration file.
        pub fn load(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read '{}'", path.display()))?;
            let config = Self::from_json5(&text)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            Ok(config)
        }

        pub fn from_json5(text: &str) -> Result<Self> {
            let config: Self = json5::from_str(text).map_err(ConfigurationError::new)?;
            config.validate()?;
            Ok(config)
        }

        pub fn validate(&self) -> Result<()> {
            let Self {
                min_level,
                max_level,
                fpn_num_filters,
                fpn_cell_repeats,
                box_class_repeats,
                num_classes,
                num_scales,
                ref aspect_ratios,
                survival_prob,
                seg_num_classes,
                ..
            } = *self;

            ensure_config!(
                min_level >= 1 && min_level <= max_level,
                "invalid level range {}..={}",
                min_level,
                max_level
            );
            ensure_config!(fpn_num_filters > 0, "fpn_num_filters must be positive");
            ensure_config!(fpn_cell_repeats > 0, "fpn_cell_repeats must be positive");
            ensure_config!(
                box_class_repeats > 0,
                "box_class_repeats must be positive"
            );
            ensure_config!(num_classes > 0, "num_classes must be positive");
            ensure_config!(
                num_scales > 0 && !aspect_ratios.is_empty(),
                "at least one anchor per location is required"
            );
            ensure_config!(
                aspect_ratios.iter().all(|ratio| ratio.raw() > 0.0),
                "aspect ratios must be positive"
            );
            if let Some(prob) = survival_prob {
                ensure_config!(
                    prob.raw() > 0.0 && prob.raw() <= 1.0,
                    "survival_prob must be in (0, 1], but get {}",
                    prob
                );
            }
            if let Some(seg_num_classes) = seg_num_classes {
                ensure_config!(seg_num_classes > 0, "seg_num_classes must be positive");
            }

            // rejects bad custom layouts early
            self.topology()?;

            Ok(())
        }

        pub fn levels(&self) -> RangeInclusive<usize> {
            self.min_level..=self.max_level
        }

        pub fn num_levels(&self) -> usize {
            self.max_level - self.min_level + 1
        }

        pub fn num_anchors(&self) -> usize {
            self.num_scales * self.aspect_ratios.len()
        }

        /// Builds the node list shared by every fusion cell.
        pub fn topology(&self) -> Result<FpnTopology> {
            let Self {
                min_level,
                max_level,
                fpn_weight_method,
                ..
            } = *self;

            let topology = match &self.fpn {
                FpnLayout::Bifpn => FpnTopology::bifpn(min_level, max_level, fpn_weight_method)?,
                FpnLayout::Custom { nodes } => FpnTopology::new(
                    min_level,
                    max_level,
                    fpn_weight_method.unwrap_or_default(),
                    nodes.clone(),
                )?,
            };
            Ok(topology)
        }
    }

    fn default_min_level() -> usize {
        3
    }

    fn default_max_level() -> usize {
        7
    }

    fn default_fpn_num_filters() -> usize {
        64
    }

    fn default_fpn_cell_repeats() -> usize {
        3
    }

    fn default_box_class_repeats() -> usize {
        3
    }

    fn default_num_classes() -> usize {
        90
    }

    fn default_num_scales() -> usize {
        3
    }

    fn default_aspect_ratios() -> Vec<R64> {
        vec![r64(1.0), r64(2.0), r64(0.5)]
    }

    fn default_true() -> bool {
        true
    }
}

mod weight_method {
    use super::*;

    /// How a fusion node combines its resampled inputs.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
    )]
    #[serde(rename_all = "snake_case")]
    #[strum(serialize_all = "snake_case")]
    pub enum WeightMethod {
        /// Softmax-normalized scalar weight per edge.
        Attn,
        /// Scalar weight per edge, normalized by the sum of weights.
        Fastattn,
        ChannelAttn,
        ChannelFastattn,
        /// Plain element-wise sum.
        Sum,
    }

    impl Default for WeightMethod {
        fn default() -> Self {
            Self::Fastattn
        }
    }

    impl WeightMethod {
        pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
            parse_tag("weight method", text)
        }

        pub fn is_per_channel(&self) -> bool {
            matches!(self, Self::ChannelAttn | Self::ChannelFastattn)
        }
    }

    impl Display for WeightMethod {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_ref())
        }
    }
}

mod pooling_type {
    use super::*;

    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
    )]
    #[serde(rename_all = "snake_case")]
    #[strum(serialize_all = "snake_case")]
    pub enum PoolingType {
        Max,
        Avg,
    }

    impl Default for PoolingType {
        fn default() -> Self {
            Self::Max
        }
    }

    impl PoolingType {
        pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
            parse_tag("pooling type", text)
        }
    }
}

mod precision {
    use super::*;

    /// Floating point kind the parameters and features are stored in.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
    )]
    #[serde(rename_all = "snake_case")]
    #[strum(serialize_all = "snake_case")]
    pub enum Precision {
        Float,
        Half,
        Bfloat16,
    }

    impl Default for Precision {
        fn default() -> Self {
            Self::Float
        }
    }
}

mod fpn_layout {
    use super::*;
    use crate::topology::FpnNode;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum FpnLayout {
        /// Top-down then bottom-up paths over all levels.
        Bifpn,
        Custom { nodes: Vec<FpnNode> },
    }

    impl Default for FpnLayout {
        fn default() -> Self {
            Self::Bifpn
        }
    }
}
