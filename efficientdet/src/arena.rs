//! The append-only feature buffer that fusion nodes read from and write to.

use crate::common::*;

/// An ordered buffer of feature maps.
///
/// A cell starts with one entry per level in ascending order. Every fusion
/// node reads entries by offset and appends its output, so offsets issued
/// earlier stay valid for the lifetime of the buffer. Which entry ends up as
/// a level's output is decided by the topology, not by the buffer.
#[derive(Debug)]
pub struct FeatureArena {
    min_level: usize,
    num_levels: usize,
    features: Vec<Tensor>,
}

impl FeatureArena {
    pub fn new(min_level: usize, features: impl IntoIterator<Item = Tensor>) -> Result<Self> {
        let features: Vec<_> = features.into_iter().collect();
        ensure!(!features.is_empty(), "at least one feature level is required");
        let num_levels = features.len();

        Ok(Self {
            min_level,
            num_levels,
            features,
        })
    }

    pub fn min_level(&self) -> usize {
        self.min_level
    }

    /// Number of levels the buffer was seeded with.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, offset: usize) -> Result<&Tensor> {
        self.features.get(offset).ok_or_else(|| {
            format_err!(
                "feature offset {} is out of range, the buffer has {} entries",
                offset,
                self.len()
            )
        })
    }

    /// The (height, width) of the cell input at `level`, which every node
    /// at that level resamples its inputs to.
    pub fn reference_size(&self, level: usize) -> Result<(i64, i64)> {
        ensure!(
            level >= self.min_level && level < self.min_level + self.num_levels,
            "level {} is out of range {}..{}",
            level,
            self.min_level,
            self.min_level + self.num_levels
        );
        let (_b, _c, h, w) = self.features[level - self.min_level].size4()?;
        Ok((h, w))
    }

    /// Appends a feature and returns its offset.
    pub fn push(&mut self, feature: Tensor) -> usize {
        self.features.push(feature);
        self.features.len() - 1
    }

    /// Picks entries by offset in the given order.
    pub fn select(&self, offsets: &[usize]) -> Result<Vec<Tensor>> {
        offsets
            .iter()
            .map(|&offset| Ok(self.get(offset)?.shallow_clone()))
            .collect()
    }
}
