//! Process group abstraction.
//!
//! All distributed routines of the crate are generic over the [Communicator]
//! trait. It is implemented for MPI communicators and for an in-process group
//! of threads ([local::LocalCommunicator]) that is used for testing.
//!
//! Every method is collective: all ranks of the group must call it in the
//! same order.

pub mod local;
mod mpi_backend;

use mpi::traits::Equivalence;

use crate::error::Result;

/// Data that can be sent between ranks.
pub trait Message: Equivalence + Copy + Default + Send + 'static {}

impl<T: Equivalence + Copy + Default + Send + 'static> Message for T {}

/// A group of cooperating processes.
pub trait Communicator: Sized {
    /// Rank of the calling process.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Elementwise global sum.
    fn all_reduce_sum(&self, values: &[u64]) -> Vec<u64>;

    /// Global minimum.
    fn all_reduce_min(&self, value: i64) -> i64;

    /// Global maximum.
    fn all_reduce_max(&self, value: i64) -> i64;

    /// Global logical and.
    fn all_reduce_and(&self, value: bool) -> bool;

    /// Send `counts[r]` to rank `r` and return the counts received from each rank.
    fn all_to_all_counts(&self, counts: &[usize]) -> Vec<usize>;

    /// Send the `counts[r]` consecutive elements starting at the sum of the
    /// previous counts to rank `r`. The received data is ordered by source rank.
    fn all_to_all_varcount<T: Message>(&self, data: &[T], counts: &[usize]) -> Vec<T>;

    /// Concatenation of the arrays of all ranks, ordered by rank.
    fn all_gather<T: Message>(&self, data: &[T]) -> Vec<T>;

    /// Send `to_prev` to rank `rank - 1` and `to_next` to rank `rank + 1`.
    ///
    /// Returns the data received from the previous and from the next rank.
    /// Data sent past the first or last rank is dropped and the
    /// corresponding received arrays are empty.
    fn exchange_neighbours<T: Message>(&self, to_prev: &[T], to_next: &[T]) -> (Vec<T>, Vec<T>);

    /// Split the group. Ranks with the same color form a new group, ordered by their old rank.
    fn split(&self, color: usize) -> Result<Self>;
}

/// Compute displacements from a vector of counts.
///
/// For the counts `[3, 4, 5]` the displacements are `[0, 3, 7]`.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let tmp = *acc;
            *acc += x;
            Some(tmp)
        })
        .collect()
}
