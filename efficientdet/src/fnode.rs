//! A single fusion node: resample every input, fuse, then refine.

use crate::{arena::FeatureArena, common::*, convert};
use model_config::{EfficientDetConfig, FpnNode, FpnTopology};
use tch_modules::{
    BatchNormInit, Conv2DInit, ConvNormAct, ConvNormActInit, Fuse2D, Fuse2DInit, FuseKind,
    PoolKind, Resample2D, Resample2DInit,
};

/// Options shared by all fusion nodes of a pyramid.
#[derive(Debug, Clone)]
pub struct FusionOptions {
    pub num_filters: usize,
    pub fuse_kind: FuseKind,
    pub apply_bn: bool,
    pub conv_after_downsample: bool,
    /// Conv, BN, activation when true; activation, conv, BN otherwise.
    pub conv_bn_act_pattern: bool,
    pub separable_conv: bool,
    pub activation: Activation,
    pub pool_kind: PoolKind,
    pub batch_norm: BatchNormInit,
}

impl FusionOptions {
    pub fn new(config: &EfficientDetConfig, topology: &FpnTopology) -> Self {
        Self {
            num_filters: config.fpn_num_filters,
            fuse_kind: convert::fuse_kind(topology.weight_method()),
            apply_bn: config.apply_bn_for_resampling,
            conv_after_downsample: config.conv_after_downsample,
            conv_bn_act_pattern: config.conv_bn_act_pattern,
            separable_conv: config.separable_conv,
            activation: config.act_type,
            pool_kind: convert::pool_kind(config.pooling_type),
            batch_norm: Default::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FusionNodeInit<'a> {
    pub node: &'a FpnNode,
    /// Channel count of every buffer entry visible to this node.
    pub entry_channels: &'a [usize],
    pub options: &'a FusionOptions,
}

impl<'a> FusionNodeInit<'a> {
    pub fn build<'p, P>(self, path: P) -> Result<FusionNode>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            node,
            entry_channels,
            options,
        } = self;
        let FusionOptions {
            num_filters,
            fuse_kind,
            apply_bn,
            conv_after_downsample,
            conv_bn_act_pattern,
            separable_conv,
            activation,
            pool_kind,
            ref batch_norm,
        } = *options;

        let resamplers: Vec<_> = node
            .inputs_offsets
            .iter()
            .enumerate()
            .map(|(index, &offset)| {
                let in_c = *entry_channels.get(offset).ok_or_else(|| {
                    format_err!("input offset {} of node {} is out of range", offset, node)
                })?;
                Resample2DInit {
                    in_c,
                    out_c: num_filters,
                    apply_bn,
                    conv_after_downsample,
                    pool_kind,
                    batch_norm: batch_norm.clone(),
                }
                .build(path / format!("resample_{}_{}", index, offset))
            })
            .try_collect()?;

        let fuse = Fuse2DInit {
            kind: fuse_kind,
            num_inputs: node.inputs_offsets.len(),
            channels: num_filters,
        }
        .build(path)?;

        let op_after_combine = ConvNormActInit {
            conv: Conv2DInit {
                bias: !conv_bn_act_pattern,
                separable: separable_conv,
                ..Conv2DInit::new(num_filters, num_filters, 3)
            },
            batch_norm: Some(batch_norm.clone()),
            activation,
            pre_activation: !conv_bn_act_pattern,
        }
        .build(path / "op_after_combine")?;

        Ok(FusionNode {
            feat_level: node.feat_level,
            inputs_offsets: node.inputs_offsets.clone(),
            resamplers,
            fuse,
            op_after_combine,
        })
    }
}

#[derive(Debug)]
pub struct FusionNode {
    feat_level: usize,
    inputs_offsets: Vec<usize>,
    resamplers: Vec<Resample2D>,
    fuse: Fuse2D,
    op_after_combine: ConvNormAct,
}

impl FusionNode {
    pub fn feat_level(&self) -> usize {
        self.feat_level
    }

    pub fn inputs_offsets(&self) -> &[usize] {
        &self.inputs_offsets
    }

    pub fn fuse(&self) -> &Fuse2D {
        &self.fuse
    }

    /// Reads the inputs from `arena`, appends the refined fusion result and
    /// returns the extended buffer.
    pub fn forward_t(&self, mut arena: FeatureArena, train: bool) -> Result<FeatureArena> {
        let target = arena.reference_size(self.feat_level)?;

        let inputs: Vec<_> = izip!(&self.inputs_offsets, &self.resamplers)
            .map(|(&offset, resampler)| {
                let xs = arena.get(offset)?;
                resampler.forward_t(xs, Some(target), train)
            })
            .try_collect()?;

        let fused = self.fuse.forward(&inputs)?;
        let output = self.op_after_combine.forward_t(&fused, train);
        arena.push(output);

        Ok(arena)
    }
}
