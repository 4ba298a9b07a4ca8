//! Static node lists of the fusion cells.

use crate::{common::*, config::WeightMethod};

/// One fusion node: the level it produces and the buffer offsets it reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpnNode {
    pub feat_level: usize,
    pub inputs_offsets: Vec<usize>,
}

impl Display for FpnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "level {} <- [{}]",
            self.feat_level,
            self.inputs_offsets.iter().join(", ")
        )
    }
}

/// A validated fusion topology.
///
/// Buffer offsets `0..num_levels` are the cell inputs, one per level in
/// ascending order. Node `i` appends its output at offset `num_levels + i`
/// and may only read offsets below that, so the graph is acyclic by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpnTopology {
    min_level: usize,
    max_level: usize,
    weight_method: WeightMethod,
    nodes: Vec<FpnNode>,
    entry_levels: Vec<usize>,
    output_offsets: Vec<usize>,
}

impl FpnTopology {
    pub fn new(
        min_level: usize,
        max_level: usize,
        weight_method: WeightMethod,
        nodes: Vec<FpnNode>,
    ) -> Result<Self> {
        ensure_config!(
            min_level <= max_level,
            "invalid level range {}..={}",
            min_level,
            max_level
        );
        let num_levels = max_level - min_level + 1;
        let mut entry_levels: Vec<usize> = (min_level..=max_level).collect();

        for (index, node) in nodes.iter().enumerate() {
            let FpnNode {
                feat_level,
                ref inputs_offsets,
            } = *node;
            let buffer_len = num_levels + index;

            ensure_config!(
                (min_level..=max_level).contains(&feat_level),
                "node {} targets level {} outside {}..={}",
                index,
                feat_level,
                min_level,
                max_level
            );
            ensure_config!(!inputs_offsets.is_empty(), "node {} has no inputs", index);
            if let Some(&offset) = inputs_offsets.iter().find(|&&offset| offset >= buffer_len) {
                return Err(ConfigurationError::new(format!(
                    "node {} reads offset {}, but only {} entries exist before it",
                    index, offset, buffer_len
                ))
                .into());
            }

            entry_levels.push(feat_level);
        }

        // the newest entry per level is the cell output
        let output_offsets: Vec<usize> = (min_level..=max_level)
            .map(|level| {
                entry_levels
                    .iter()
                    .rposition(|&entry_level| entry_level == level)
                    .ok_or_else(|| format_err!("no entry at level {}", level))
            })
            .try_collect()?;

        Ok(Self {
            min_level,
            max_level,
            weight_method,
            nodes,
            entry_levels,
            output_offsets,
        })
    }

    /// The bidirectional topology: a top-down pass from `max_level - 1` to
    /// `min_level`, then a bottom-up pass from `min_level + 1` to `max_level`.
    pub fn bifpn(
        min_level: usize,
        max_level: usize,
        weight_method: Option<WeightMethod>,
    ) -> Result<Self> {
        ensure_config!(
            min_level <= max_level,
            "invalid level range {}..={}",
            min_level,
            max_level
        );
        let num_levels = max_level - min_level + 1;

        // offsets produced so far, indexed by level - min_level
        let mut node_ids: Vec<Vec<usize>> = (0..num_levels).map(|offset| vec![offset]).collect();
        let mut next_id = num_levels;
        let mut nodes = vec![];

        let last_id = |node_ids: &[Vec<usize>], level: usize| -> usize {
            let ids = &node_ids[level - min_level];
            ids[ids.len() - 1]
        };

        // top-down
        for level in (min_level..max_level).rev() {
            let inputs_offsets = vec![last_id(&node_ids, level), last_id(&node_ids, level + 1)];
            nodes.push(FpnNode {
                feat_level: level,
                inputs_offsets,
            });
            node_ids[level - min_level].push(next_id);
            next_id += 1;
        }

        // bottom-up
        for level in (min_level + 1)..=max_level {
            let mut inputs_offsets = node_ids[level - min_level].clone();
            inputs_offsets.push(last_id(&node_ids, level - 1));
            nodes.push(FpnNode {
                feat_level: level,
                inputs_offsets,
            });
            node_ids[level - min_level].push(next_id);
            next_id += 1;
        }

        Self::new(min_level, max_level, weight_method.unwrap_or_default(), nodes)
    }

    pub fn min_level(&self) -> usize {
        self.min_level
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn num_levels(&self) -> usize {
        self.max_level - self.min_level + 1
    }

    pub fn weight_method(&self) -> WeightMethod {
        self.weight_method
    }

    pub fn nodes(&self) -> &[FpnNode] {
        &self.nodes
    }

    /// Total number of buffer entries after a cell runs.
    pub fn buffer_len(&self) -> usize {
        self.entry_levels.len()
    }

    /// The pyramid level of every buffer entry, indexed by offset.
    pub fn entry_levels(&self) -> &[usize] {
        &self.entry_levels
    }

    /// Per level in ascending order, the offset of the last entry produced at
    /// that level. Later nodes override earlier ones.
    pub fn output_offsets(&self) -> &[usize] {
        &self.output_offsets
    }

    /// Computes the channel count of every buffer entry given the cell input
    /// channels and the node output width.
    pub fn entry_channels(
        &self,
        input_channels: &[usize],
        num_filters: usize,
    ) -> Result<Vec<usize>> {
        ensure_config!(
            input_channels.len() == self.num_levels(),
            "expect {} input channel counts, but get {}",
            self.num_levels(),
            input_channels.len()
        );
        let channels = input_channels
            .iter()
            .cloned()
            .chain(self.nodes.iter().map(|_| num_filters))
            .collect();
        Ok(channels)
    }

    pub fn log_summary(&self) {
        info!(
            "fpn topology: levels {}..={}, {} nodes, weight method {}",
            self.min_level,
            self.max_level,
            self.nodes.len(),
            self.weight_method
        );
        self.nodes.iter().enumerate().for_each(|(index, node)| {
            info!("fnode {}: {}", index, node);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(feat_level: usize, inputs_offsets: &[usize]) -> FpnNode {
        FpnNode {
            feat_level,
            inputs_offsets: inputs_offsets.to_vec(),
        }
    }

    #[test]
    fn bifpn_p3_p7() -> Result<()> {
        let topology = FpnTopology::bifpn(3, 7, None)?;
        let expect = vec![
            node(6, &[3, 4]),
            node(5, &[2, 5]),
            node(4, &[1, 6]),
            node(3, &[0, 7]),
            node(4, &[1, 7, 8]),
            node(5, &[2, 6, 9]),
            node(6, &[3, 5, 10]),
            node(7, &[4, 11]),
        ];
        assert_eq!(topology.nodes(), expect.as_slice());
        assert_eq!(topology.weight_method(), WeightMethod::Fastattn);
        assert_eq!(topology.output_offsets(), &[8, 9, 10, 11, 12]);
        assert_eq!(topology.buffer_len(), 13);
        Ok(())
    }

    #[test]
    fn bifpn_p3_p5() -> Result<()> {
        let topology = FpnTopology::bifpn(3, 5, Some(WeightMethod::Sum))?;
        let expect = vec![
            node(4, &[1, 2]),
            node(3, &[0, 3]),
            node(4, &[1, 3, 4]),
            node(5, &[2, 5]),
        ];
        assert_eq!(topology.nodes(), expect.as_slice());
        assert_eq!(topology.output_offsets(), &[4, 5, 6]);
        assert_eq!(topology.entry_levels(), &[3, 4, 5, 4, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn single_level_bifpn_has_no_nodes() -> Result<()> {
        let topology = FpnTopology::bifpn(4, 4, None)?;
        assert!(topology.nodes().is_empty());
        assert_eq!(topology.output_offsets(), &[0]);
        Ok(())
    }

    #[test]
    fn later_node_wins_at_same_level() -> Result<()> {
        let topology = FpnTopology::new(
            3,
            4,
            WeightMethod::Sum,
            vec![node(3, &[0, 1]), node(4, &[1, 2]), node(3, &[2, 3])],
        )?;
        // offsets 2 and 4 are both at level 3
        assert_eq!(topology.output_offsets(), &[4, 3]);
        Ok(())
    }

    #[test]
    fn untouched_level_passes_input_through() -> Result<()> {
        let topology = FpnTopology::new(3, 5, WeightMethod::Sum, vec![node(4, &[0, 1, 2])])?;
        assert_eq!(topology.output_offsets(), &[0, 3, 2]);
        Ok(())
    }

    #[test]
    fn reject_forward_reference() {
        let err = FpnTopology::new(3, 4, WeightMethod::Sum, vec![node(3, &[0, 2])]).unwrap_err();
        assert!(err.downcast_ref::<ConfigurationError>().is_some());
    }

    #[test]
    fn reject_empty_inputs_and_bad_level() {
        assert!(FpnTopology::new(3, 4, WeightMethod::Sum, vec![node(3, &[])]).is_err());
        assert!(FpnTopology::new(3, 4, WeightMethod::Sum, vec![node(5, &[0])]).is_err());
    }

    #[test]
    fn entry_channels() -> Result<()> {
        let topology = FpnTopology::bifpn(3, 5, None)?;
        let channels = topology.entry_channels(&[40, 80, 160], 64)?;
        assert_eq!(channels, vec![40, 80, 160, 64, 64, 64, 64]);
        assert!(topology.entry_channels(&[40, 80], 64).is_err());
        Ok(())
    }
}
