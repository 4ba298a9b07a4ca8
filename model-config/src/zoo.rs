//! Preset configurations of the EfficientDet family.

use crate::{common::*, config::*};

/// Builds the D`phi` preset. D7x is [efficientdet_d7x].
pub fn efficientdet(phi: usize) -> Result<EfficientDetConfig> {
    // (fpn_num_filters, fpn_cell_repeats, box_class_repeats)
    let (fpn_num_filters, fpn_cell_repeats, box_class_repeats) = match phi {
        0 => (64, 3, 3),
        1 => (88, 4, 3),
        2 => (112, 5, 3),
        3 => (160, 6, 4),
        4 => (224, 7, 4),
        5 => (288, 7, 4),
        6 | 7 => (384, 8, 5),
        _ => {
            return Err(ConfigurationError::new(format!("no EfficientDet-D{} preset", phi)).into())
        }
    };
    let fpn_weight_method = (phi >= 6).then(|| WeightMethod::Sum);

    Ok(EfficientDetConfig {
        fpn_num_filters,
        fpn_cell_repeats,
        box_class_repeats,
        fpn_weight_method,
        ..Default::default()
    })
}

pub fn efficientdet_d0() -> EfficientDetConfig {
    EfficientDetConfig::default()
}

pub fn efficientdet_d7x() -> EfficientDetConfig {
    EfficientDetConfig {
        max_level: 8,
        fpn_num_filters: 384,
        fpn_cell_repeats: 8,
        box_class_repeats: 5,
        fpn_weight_method: Some(WeightMethod::Sum),
        ..Default::default()
    }
}

/// Looks up a preset by name, e.g. `efficientdet-d3` or `d7x`.
pub fn preset(name: &str) -> Result<EfficientDetConfig> {
    let name = name.trim_start_matches("efficientdet-");
    let config = match name {
        "d7x" => efficientdet_d7x(),
        _ => {
            let phi: usize = name
                .strip_prefix('d')
                .and_then(|phi| phi.parse().ok())
                .ok_or_else(|| ConfigurationError::new(format!("unknown preset '{}'", name)))?;
            efficientdet(phi)?
        }
    };
    Ok(config)
}
