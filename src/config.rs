//! Parameters of the tree sort.

use std::ops::{BitOr, BitOrAssign};

use crate::{
    constants::{
        DEFAULT_LOAD_FLEXIBILITY, DEFAULT_MAX_DEPTH, DEFAULT_SF_K, DEFAULT_SLACK_FRACTION,
    },
    curve::Curve,
    error::{OctreeError, Result},
    octant::check_grid,
};

/// Bit flags that select what the tree sort produces in addition to the sorted array.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SortOptions(u32);

impl SortOptions {
    /// Only sort.
    pub const NONE: SortOptions = SortOptions(0);
    /// Remove duplicates and ancestors from the sorted array.
    pub const REMOVE_DUPLICATES: SortOptions = SortOptions(1);
    /// Construct a complete linear octree from the input.
    pub const CONSTRUCT_OCTREE: SortOptions = SortOptions(2);
    /// Construct a complete, 2:1 balanced linear octree from the input.
    pub const BALANCE_OCTREE: SortOptions = SortOptions(4);

    /// Check whether all flags of `other` are set.
    pub fn contains(&self, other: SortOptions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether duplicates are removed.
    pub fn remove_duplicates(&self) -> bool {
        self.contains(Self::REMOVE_DUPLICATES)
    }

    /// Whether a complete octree is constructed. Balancing implies construction.
    pub fn construct(&self) -> bool {
        self.contains(Self::CONSTRUCT_OCTREE) || self.balance()
    }

    /// Whether a balanced octree is constructed.
    pub fn balance(&self) -> bool {
        self.contains(Self::BALANCE_OCTREE)
    }

    /// Raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for SortOptions {
    type Output = SortOptions;

    fn bitor(self, rhs: Self) -> Self::Output {
        SortOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for SortOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Configuration of the tree sort and of the dynamic repartitioner.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeSortConfig {
    /// Bit depth of the coordinate grid.
    pub max_depth: u8,
    /// Spatial dimension, 2 or 3.
    pub dim: u8,
    /// Grain of the constructed leaves. A bucket with at most `k` input
    /// octants becomes a leaf of the constructed tree.
    pub k: usize,
    /// Relative load imbalance tolerated by the splitter search, in `(0, 1]`.
    pub load_flexibility: f64,
    /// What to produce in addition to the sorted array.
    pub options: SortOptions,
    /// Group size of the staged splitter search. Groups of processes are
    /// used whenever the number of processes exceeds this value.
    pub sf_k: usize,
    /// Fraction of the average local load that may move across a process
    /// boundary during dynamic repartitioning, in `[0, 1]`.
    pub slack_fraction: f64,
    /// The space filling curve.
    pub curve: Curve,
}

impl Default for TreeSortConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            dim: 3,
            k: 1,
            load_flexibility: DEFAULT_LOAD_FLEXIBILITY,
            options: SortOptions::NONE,
            sf_k: DEFAULT_SF_K,
            slack_fraction: DEFAULT_SLACK_FRACTION,
            curve: Curve::default(),
        }
    }
}

impl TreeSortConfig {
    /// Configuration for a grid of given dimension and depth.
    pub fn new(dim: u8, max_depth: u8) -> Self {
        Self {
            dim,
            max_depth,
            ..Default::default()
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: SortOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the grain.
    pub fn with_grain(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Replace the curve.
    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    /// Replace the load flexibility.
    pub fn with_load_flexibility(mut self, load_flexibility: f64) -> Self {
        self.load_flexibility = load_flexibility;
        self
    }

    /// Replace the group size of the staged splitter search.
    pub fn with_sf_k(mut self, sf_k: usize) -> Self {
        self.sf_k = sf_k;
        self
    }

    /// Check that all parameters are admissible.
    pub fn validate(&self) -> Result<()> {
        check_grid(self.dim, self.max_depth)?;
        if self.k == 0 {
            return Err(OctreeError::InvalidGrain);
        }
        if !(self.load_flexibility > 0.0 && self.load_flexibility <= 1.0) {
            return Err(OctreeError::InvalidLoadFlexibility(self.load_flexibility));
        }
        if self.sf_k < 2 {
            return Err(OctreeError::InvalidGroupSize(self.sf_k));
        }
        if !(0.0..=1.0).contains(&self.slack_fraction) {
            return Err(OctreeError::InvalidSlackFraction(self.slack_fraction));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{SortOptions, TreeSortConfig};

    #[test]
    fn test_options() {
        let options = SortOptions::REMOVE_DUPLICATES | SortOptions::BALANCE_OCTREE;
        assert!(options.remove_duplicates());
        assert!(options.balance());
        assert!(options.construct());
        assert!(!SortOptions::NONE.construct());
        assert_eq!(options.bits(), 5);
    }

    #[test]
    fn test_validation() {
        assert!(TreeSortConfig::default().validate().is_ok());
        assert!(TreeSortConfig::new(4, 10).validate().is_err());
        assert!(TreeSortConfig::new(2, 31).validate().is_err());
        assert!(TreeSortConfig::new(3, 10).with_grain(0).validate().is_err());
        assert!(TreeSortConfig::new(3, 10)
            .with_load_flexibility(0.0)
            .validate()
            .is_err());
        assert!(TreeSortConfig::new(3, 10)
            .with_load_flexibility(1.0)
            .validate()
            .is_ok());
        assert!(TreeSortConfig::new(3, 10).with_sf_k(1).validate().is_err());
    }
}
