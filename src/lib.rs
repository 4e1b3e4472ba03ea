//! Distributed space filling curve sorting of octants.
//!
//! Octants are sorted along a Morton or Hilbert curve with a recursive in
//! place bucketing. The same traversal constructs complete linear octrees and
//! 2:1 balanced linear octrees. The distributed variant selects splitters with
//! a global histogram, redistributes the octants and merges the process
//! boundaries. A dynamic repartitioner moves process boundaries to reduce the
//! number of faces shared between processes.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod communicator;
pub mod config;
pub mod constants;
pub mod curve;
pub mod error;
pub mod geometry;
pub mod octant;
pub mod repartition;
pub mod tools;
pub mod treesort;
