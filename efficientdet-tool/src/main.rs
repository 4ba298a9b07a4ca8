use anyhow::{bail, Result};
use clap::{Args, Parser};
use efficientdet::{
    config::{zoo, EfficientDetConfig, Precision},
    convert, EfficientDet,
};
use log::info;
use prettytable::{cell, row, Table};
use std::{env, path::PathBuf};
use tch::{nn, Device, Tensor};
use tch_tensor_like::TensorLike;

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// configuration file
    #[clap(long)]
    config_file: Option<PathBuf>,
    /// zoo preset name, such as efficientdet-d0
    #[clap(long)]
    preset: Option<String>,
}

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Print the fusion topology.
    Info {
        #[clap(flatten)]
        config: ConfigArgs,
    },
    /// Run a forward pass on random backbone features and print output shapes.
    Forward {
        #[clap(flatten)]
        config: ConfigArgs,
        /// channels of each backbone level starting at min_level
        #[clap(long, use_value_delimiter = true, default_value = "40,112,320")]
        backbone_channels: Vec<usize>,
        /// input image size in pixels
        #[clap(long, default_value = "512")]
        image_size: i64,
        #[clap(long, default_value = "1")]
        batch_size: i64,
        /// override the configured precision: float, half or bfloat16
        #[clap(long)]
        precision: Option<Precision>,
    },
}

fn main() -> Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Info { config } => {
            info_cmd(&config.load()?)?;
        }
        Opts::Forward {
            config,
            backbone_channels,
            image_size,
            batch_size,
            precision,
        } => {
            let mut config = config.load()?;
            if let Some(precision) = precision {
                config.precision = precision;
            }
            forward_cmd(&config, &backbone_channels, image_size, batch_size)?;
        }
    }

    Ok(())
}

impl ConfigArgs {
    fn load(&self) -> Result<EfficientDetConfig> {
        let config = match (&self.config_file, &self.preset) {
            (Some(file), None) => EfficientDetConfig::load(file)?,
            (None, Some(name)) => zoo::preset(name)?,
            (None, None) => bail!("either --config-file or --preset must be given"),
            (Some(_), Some(_)) => bail!("--config-file and --preset are mutually exclusive"),
        };
        Ok(config)
    }
}

fn info_cmd(config: &EfficientDetConfig) -> Result<()> {
    let topology = config.topology()?;
    let num_levels = topology.num_levels();

    println!(
        "levels {}..={}, {} cells of {} nodes, weight method {}, {} filters",
        topology.min_level(),
        topology.max_level(),
        config.fpn_cell_repeats,
        topology.nodes().len(),
        topology.weight_method(),
        config.fpn_num_filters
    );

    let mut table = Table::new();
    table.add_row(row!["offset", "level", "inputs_offsets"]);
    topology
        .nodes()
        .iter()
        .enumerate()
        .for_each(|(index, node)| {
            table.add_row(row![
                num_levels + index,
                node.feat_level,
                format!("{:?}", node.inputs_offsets)
            ]);
        });
    table.printstd();

    println!("output offsets: {:?}", topology.output_offsets());
    Ok(())
}

fn forward_cmd(
    config: &EfficientDetConfig,
    backbone_channels: &[usize],
    image_size: i64,
    batch_size: i64,
) -> Result<()> {
    let device = Device::cuda_if_available();
    check_precision(device, config.precision)?;
    let kind = convert::kind(config.precision);
    let mut vs = nn::VarStore::new(device);
    let model = EfficientDet::from_config(config, backbone_channels, &vs.root())?;
    match config.precision {
        Precision::Float => {}
        Precision::Half => vs.half(),
        Precision::Bfloat16 => vs.bfloat16(),
    }
    info!(
        "{} parameters on {:?}",
        vs.trainable_variables()
            .iter()
            .map(|xs| xs.numel())
            .sum::<usize>(),
        device
    );

    let inputs: Vec<_> = backbone_channels
        .iter()
        .enumerate()
        .map(|(index, &channels)| {
            let stride = 1i64 << (config.min_level + index);
            let size = (image_size + stride - 1) / stride;
            Tensor::randn(
                &[batch_size, channels as i64, size, size],
                (kind, device),
            )
        })
        .collect();

    let output = tch::no_grad(|| model.forward_t(&inputs, false))?;
    let output = output.to_device(Device::Cpu);

    let mut table = Table::new();
    table.add_row(row!["level", "class output", "box output"]);
    for (index, (class_output, box_output)) in output
        .class_outputs
        .iter()
        .zip(&output.box_outputs)
        .enumerate()
    {
        table.add_row(row![
            config.min_level + index,
            format!("{:?}", class_output.size()),
            format!("{:?}", box_output.size())
        ]);
    }
    table.printstd();

    if let Some(seg_output) = &output.seg_output {
        println!("segmentation output: {:?}", seg_output.size());
    }

    Ok(())
}

/// Half precision convolutions have no CPU kernels in libtorch.
fn check_precision(device: Device, precision: Precision) -> Result<()> {
    if device == Device::Cpu && precision == Precision::Half {
        bail!("half precision requires a CUDA device, use float or bfloat16 on CPU");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_on_cpu_is_rejected() {
        assert!(check_precision(Device::Cpu, Precision::Half).is_err());
        assert!(check_precision(Device::Cpu, Precision::Float).is_ok());
        assert!(check_precision(Device::Cpu, Precision::Bfloat16).is_ok());
        assert!(check_precision(Device::Cuda(0), Precision::Half).is_ok());
    }
}
