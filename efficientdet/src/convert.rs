//! Maps configuration tags onto module kinds.

use crate::common::*;
use model_config as config;
use tch_modules as modules;

pub fn fuse_kind(method: config::WeightMethod) -> modules::FuseKind {
    match method {
        config::WeightMethod::Sum => modules::FuseKind::Sum,
        config::WeightMethod::Attn => modules::FuseKind::Attn,
        config::WeightMethod::Fastattn => modules::FuseKind::FastAttn,
        config::WeightMethod::ChannelAttn => modules::FuseKind::ChannelAttn,
        config::WeightMethod::ChannelFastattn => modules::FuseKind::ChannelFastAttn,
    }
}

pub fn pool_kind(pooling: config::PoolingType) -> modules::PoolKind {
    match pooling {
        config::PoolingType::Max => modules::PoolKind::Max,
        config::PoolingType::Avg => modules::PoolKind::Avg,
    }
}

pub fn kind(precision: config::Precision) -> Kind {
    match precision {
        config::Precision::Float => Kind::Float,
        config::Precision::Half => Kind::Half,
        config::Precision::Bfloat16 => Kind::BFloat16,
    }
}
