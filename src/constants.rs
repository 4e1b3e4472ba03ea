//! Definition of constants.

/// Deepest admissible level of an octree. Coordinates are stored in `u32`
/// and the volume of the unit domain at this depth still fits into `u128`.
pub const DEEPEST_LEVEL: u8 = 30;

/// Default depth of the coordinate grid.
pub const DEFAULT_MAX_DEPTH: u8 = 30;

/// Maximum number of children of an octant (3d).
pub const NSIBLINGS: usize = 8;

/// Number of children of a quadrant (2d).
pub const NSIBLINGS_2D: usize = 4;

/// Number of same-level neighbours of an octant in 3d.
pub const NNEIGHBOURS: usize = 26;

/// Number of same-level neighbours of a quadrant in 2d.
pub const NNEIGHBOURS_2D: usize = 8;

/// Weight of a single face shared with another process.
///
/// A face between two octants of equal level is counted with this
/// weight. A face between octants differing by one level covers a
/// quarter of the coarser face and is counted with weight one.
pub const BAL_CONST: i64 = 4;

/// Default group size of the staged splitter search.
pub const DEFAULT_SF_K: usize = 128;

/// Default relative load imbalance tolerated by the splitter search.
pub const DEFAULT_LOAD_FLEXIBILITY: f64 = 0.1;

/// Default fraction of the average load that may move during dynamic repartitioning.
pub const DEFAULT_SLACK_FRACTION: f64 = 0.1;
