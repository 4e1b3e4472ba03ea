//! Error type shared by all operations of the crate.

use thiserror::Error;

/// Errors raised by the sorting, construction, balancing and repartitioning routines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OctreeError {
    /// Only two and three dimensional trees are supported.
    #[error("dimension must be 2 or 3, got {0}")]
    InvalidDimension(u8),

    /// The depth of the coordinate grid exceeds what an octant can store.
    #[error("maximum depth {depth} exceeds the supported limit {limit}")]
    InvalidMaxDepth {
        /// Requested depth.
        depth: u8,
        /// Largest supported depth.
        limit: u8,
    },

    /// An octant does not describe a cell of the configured grid.
    #[error("octant ({x}, {y}, {z}) at level {level} is outside of a grid with depth {max_depth}")]
    OctantOutOfRange {
        /// Anchor x coordinate.
        x: u32,
        /// Anchor y coordinate.
        y: u32,
        /// Anchor z coordinate.
        z: u32,
        /// Level of the octant.
        level: u8,
        /// Depth of the grid.
        max_depth: u8,
    },

    /// An octant was built for another dimension or grid depth than the tree.
    #[error("octant has dim {found_dim} and depth {found_depth}, expected dim {dim} and depth {depth}")]
    ParameterMismatch {
        /// Dimension of the octant.
        found_dim: u8,
        /// Grid depth of the octant.
        found_depth: u8,
        /// Configured dimension.
        dim: u8,
        /// Configured grid depth.
        depth: u8,
    },

    /// A user supplied rotation table is not a valid curve automaton.
    #[error("malformed rotation table: {0}")]
    MalformedRotation(String),

    /// The load flexibility must lie in `(0, 1]`.
    #[error("load flexibility must lie in (0, 1], got {0}")]
    InvalidLoadFlexibility(f64),

    /// The slack fraction must lie in `[0, 1]`.
    #[error("slack fraction must lie in [0, 1], got {0}")]
    InvalidSlackFraction(f64),

    /// The leaf grain must be at least one.
    #[error("grain k must be at least 1")]
    InvalidGrain,

    /// The staged splitter search needs groups of at least two processes.
    #[error("staged splitter group size must be at least 2, got {0}")]
    InvalidGroupSize(usize),

    /// The slack of the dynamic repartitioner is not smaller than a local partition.
    #[error("slack of {slack} octants is not smaller than the local partition of {local} octants")]
    SlackTooLarge {
        /// Number of octants that would be exchanged.
        slack: usize,
        /// Size of the local partition.
        local: usize,
    },

    /// Another rank of the process group rejected its input.
    #[error("invalid input on another rank of the process group")]
    RemoteFailure,

    /// Splitting a communicator failed.
    #[error("could not split communicator: {0}")]
    CommunicatorSplit(String),
}

/// Result type of the crate.
pub type Result<T> = std::result::Result<T, OctreeError>;
