//! Fusion cells and the stack of repeated cells.

use crate::{
    arena::FeatureArena,
    common::*,
    fnode::{FusionNode, FusionNodeInit, FusionOptions},
};
use model_config::{EfficientDetConfig, FpnTopology};

#[derive(Debug, Clone)]
pub struct FusionCellInit<'a> {
    pub topology: &'a FpnTopology,
    pub input_channels: &'a [usize],
    pub options: &'a FusionOptions,
}

impl<'a> FusionCellInit<'a> {
    pub fn build<'p, P>(self, path: P) -> Result<FusionCell>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            topology,
            input_channels,
            options,
        } = self;
        let entry_channels = topology.entry_channels(input_channels, options.num_filters)?;

        let nodes: Vec<_> = topology
            .nodes()
            .iter()
            .enumerate()
            .map(|(index, node)| {
                FusionNodeInit {
                    node,
                    entry_channels: &entry_channels,
                    options,
                }
                .build(path / format!("fnode{}", index))
            })
            .try_collect()?;

        let output_channels = topology
            .output_offsets()
            .iter()
            .map(|&offset| entry_channels[offset])
            .collect();

        Ok(FusionCell {
            topology: topology.clone(),
            nodes,
            output_channels,
        })
    }
}

/// One pass over the topology's node list.
#[derive(Debug)]
pub struct FusionCell {
    topology: FpnTopology,
    nodes: Vec<FusionNode>,
    output_channels: Vec<usize>,
}

impl FusionCell {
    pub fn nodes(&self) -> &[FusionNode] {
        &self.nodes
    }

    /// Channel count of each output level in ascending order.
    pub fn output_channels(&self) -> &[usize] {
        &self.output_channels
    }

    /// Runs all nodes in order and returns the final buffer.
    pub fn forward_t(&self, features: &[Tensor], train: bool) -> Result<FeatureArena> {
        let num_levels = self.topology.num_levels();
        ensure!(
            features.len() == num_levels,
            "expect {} feature levels, but get {}",
            num_levels,
            features.len()
        );

        let arena = FeatureArena::new(
            self.topology.min_level(),
            features.iter().map(|xs| xs.shallow_clone()),
        )?;
        self.nodes
            .iter()
            .try_fold(arena, |arena, node| node.forward_t(arena, train))
    }

    /// Runs the cell and extracts one feature per level, taking the last
    /// entry written at each level.
    pub fn outputs_t(&self, features: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
        let arena = self.forward_t(features, train)?;
        arena.select(self.topology.output_offsets())
    }
}

/// The feature network: `fpn_cell_repeats` fusion cells with independent
/// parameters sharing one topology.
#[derive(Debug)]
pub struct FusionPyramid {
    topology: FpnTopology,
    cells: Vec<FusionCell>,
    output_channels: Vec<usize>,
}

impl FusionPyramid {
    /// Builds the cells. `input_channels` lists the width of every level
    /// entering the first cell.
    pub fn new<'p>(
        path: impl Borrow<nn::Path<'p>>,
        config: &EfficientDetConfig,
        input_channels: &[usize],
    ) -> Result<Self> {
        let path = path.borrow();
        let topology = config.topology()?;
        topology.log_summary();
        let options = FusionOptions::new(config, &topology);

        let mut channels = input_channels.to_vec();
        let cells: Vec<_> = (0..config.fpn_cell_repeats)
            .map(|index| -> Result<_> {
                let cell = FusionCellInit {
                    topology: &topology,
                    input_channels: &channels,
                    options: &options,
                }
                .build(path / format!("cell_{}", index))?;
                channels = cell.output_channels().to_vec();
                Ok(cell)
            })
            .try_collect()?;
        info!(
            "built {} fusion cells, output channels {:?}",
            cells.len(),
            channels
        );

        Ok(Self {
            topology,
            cells,
            output_channels: channels,
        })
    }

    pub fn topology(&self) -> &FpnTopology {
        &self.topology
    }

    pub fn cells(&self) -> &[FusionCell] {
        &self.cells
    }

    pub fn output_channels(&self) -> &[usize] {
        &self.output_channels
    }

    pub fn forward_t(&self, features: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
        let features: Vec<_> = features.iter().map(|xs| xs.shallow_clone()).collect();
        self.cells
            .iter()
            .enumerate()
            .try_fold(features, |features, (index, cell)| {
                cell.outputs_t(&features, train)
                    .with_context(|| format!("fusion cell {} failed", index))
            })
    }
}
