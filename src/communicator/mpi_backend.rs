//! [Communicator] implementation for MPI communicators.

use mpi::{
    collective::SystemOperation,
    datatype::{Partition, PartitionMut},
    point_to_point as p2p,
    topology::{Color, SimpleCommunicator},
    traits::{Communicator as MpiCommunicator, CommunicatorCollectives, Destination, Source},
    Count,
};

use super::{displacements, Communicator, Message};
use crate::error::{OctreeError, Result};

fn to_counts(values: &[usize]) -> Vec<Count> {
    values.iter().map(|&v| v as Count).collect()
}

impl Communicator for SimpleCommunicator {
    fn rank(&self) -> usize {
        MpiCommunicator::rank(self) as usize
    }

    fn size(&self) -> usize {
        MpiCommunicator::size(self) as usize
    }

    fn all_reduce_sum(&self, values: &[u64]) -> Vec<u64> {
        let mut result = vec![0u64; values.len()];
        self.all_reduce_into(values, &mut result[..], SystemOperation::sum());
        result
    }

    fn all_reduce_min(&self, value: i64) -> i64 {
        let mut result = value;
        self.all_reduce_into(&value, &mut result, SystemOperation::min());
        result
    }

    fn all_reduce_max(&self, value: i64) -> i64 {
        let mut result = value;
        self.all_reduce_into(&value, &mut result, SystemOperation::max());
        result
    }

    fn all_reduce_and(&self, value: bool) -> bool {
        let mut result = false;
        self.all_reduce_into(&value, &mut result, SystemOperation::logical_and());
        result
    }

    fn all_to_all_counts(&self, counts: &[usize]) -> Vec<usize> {
        assert_eq!(counts.len(), Communicator::size(self));
        let counts = to_counts(counts);
        let mut recv_counts = vec![0 as Count; counts.len()];
        self.all_to_all_into(&counts[..], &mut recv_counts[..]);
        recv_counts.iter().map(|&c| c as usize).collect()
    }

    fn all_to_all_varcount<T: Message>(&self, data: &[T], counts: &[usize]) -> Vec<T> {
        let recv_counts = self.all_to_all_counts(counts);
        let nelems = recv_counts.iter().sum::<usize>();
        let mut output = vec![T::default(); nelems];

        let send_counts = to_counts(counts);
        let send_displs = to_counts(&displacements(counts));
        let recv_displs = to_counts(&displacements(&recv_counts));
        let recv_counts = to_counts(&recv_counts);

        let send_partition = Partition::new(data, &send_counts[..], &send_displs[..]);
        let mut recv_partition =
            PartitionMut::new(&mut output[..], &recv_counts[..], &recv_displs[..]);

        self.all_to_all_varcount_into(&send_partition, &mut recv_partition);

        output
    }

    fn all_gather<T: Message>(&self, data: &[T]) -> Vec<T> {
        let size = Communicator::size(self);
        let local_len = data.len() as Count;
        let mut sizes = vec![0 as Count; size];
        self.all_gather_into(&local_len, &mut sizes[..]);

        let recv_len = sizes.iter().map(|&s| s as usize).sum::<usize>();
        let mut output = vec![T::default(); recv_len];
        let displs = to_counts(&displacements(
            &sizes.iter().map(|&s| s as usize).collect::<Vec<_>>(),
        ));

        let mut partition = PartitionMut::new(&mut output[..], &sizes[..], &displs[..]);
        self.all_gather_varcount_into(data, &mut partition);

        output
    }

    fn exchange_neighbours<T: Message>(&self, to_prev: &[T], to_next: &[T]) -> (Vec<T>, Vec<T>) {
        let rank = Communicator::rank(self);
        let size = Communicator::size(self);
        let prev = if rank > 0 { Some(rank - 1) } else { None };
        let next = if rank + 1 < size { Some(rank + 1) } else { None };

        // Shift forward, then shift backward.
        let from_prev = shift(self, to_next, next, prev);
        let from_next = shift(self, to_prev, prev, next);
        (from_prev, from_next)
    }

    fn split(&self, color: usize) -> Result<Self> {
        self.split_by_color(Color::with_value(color as i32))
            .ok_or_else(|| OctreeError::CommunicatorSplit(format!("color {}", color)))
    }
}

/// Send `data` to `dest` and receive an array of unknown length from `source`.
fn shift<T: Message>(
    comm: &SimpleCommunicator,
    data: &[T],
    dest: Option<usize>,
    source: Option<usize>,
) -> Vec<T> {
    let len = data.len() as Count;
    let mut recv_len: Count = 0;

    match (dest, source) {
        (Some(dest), Some(source)) => {
            p2p::send_receive_into(
                &len,
                &comm.process_at_rank(dest as i32),
                &mut recv_len,
                &comm.process_at_rank(source as i32),
            );
        }
        (Some(dest), None) => comm.process_at_rank(dest as i32).send(&len),
        (None, Some(source)) => {
            comm.process_at_rank(source as i32).receive_into(&mut recv_len);
        }
        (None, None) => (),
    }

    let mut buffer = vec![T::default(); recv_len as usize];

    match (dest, source) {
        (Some(dest), Some(source)) => {
            p2p::send_receive_into(
                data,
                &comm.process_at_rank(dest as i32),
                &mut buffer[..],
                &comm.process_at_rank(source as i32),
            );
        }
        (Some(dest), None) => comm.process_at_rank(dest as i32).send(data),
        (None, Some(source)) => {
            comm.process_at_rank(source as i32)
                .receive_into(&mut buffer[..]);
        }
        (None, None) => (),
    }

    buffer
}
