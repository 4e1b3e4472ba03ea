//! In-process process group built from threads and channels.
//!
//! Each ordered pair of ranks is connected by its own unbounded channel.
//! Collective calls happen in the same order on all ranks, so the per pair
//! FIFO order of the channels matches messages of the same call.

use std::{any::Any, thread};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{Communicator, Message};
use crate::error::Result;

type Packet = Box<dyn Any + Send>;

/// A rank of an in-process group of threads.
pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<Sender<Packet>>,
    receivers: Vec<Receiver<Packet>>,
}

impl LocalCommunicator {
    /// Create the communicators of a group of `size` ranks.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        assert!(size > 0, "a process group needs at least one rank");

        // channels[src][dst]
        let mut senders = vec![Vec::with_capacity(size); size];
        let mut receivers = vec![Vec::with_capacity(size); size];
        for src_senders in senders.iter_mut() {
            for dst_receivers in receivers.iter_mut() {
                let (sender, receiver) = unbounded::<Packet>();
                src_senders.push(sender);
                dst_receivers.push(receiver);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalCommunicator {
                rank,
                senders,
                receivers,
            })
            .collect()
    }

    fn send<P: Send + 'static>(&self, dest: usize, payload: P) {
        // Sending can only fail once the destination thread has terminated.
        if self.senders[dest].send(Box::new(payload)).is_err() {
            panic!("rank {} cannot reach terminated rank {}", self.rank, dest);
        }
    }

    fn receive<P: Send + 'static>(&self, source: usize) -> P {
        let packet = match self.receivers[source].recv() {
            Ok(packet) => packet,
            Err(_) => panic!("rank {} lost connection to rank {}", self.rank, source),
        };
        match packet.downcast::<P>() {
            Ok(payload) => *payload,
            Err(_) => panic!(
                "rank {} received an unexpected message from rank {}, collective calls are out of order",
                self.rank, source
            ),
        }
    }

    /// Send `outgoing[r]` to rank `r` and receive one payload from every rank.
    fn exchange_all<P: Send + 'static>(&self, outgoing: Vec<P>) -> Vec<P> {
        debug_assert_eq!(outgoing.len(), self.size());
        for (dest, payload) in outgoing.into_iter().enumerate() {
            self.send(dest, payload);
        }
        (0..self.size()).map(|source| self.receive(source)).collect()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_reduce_sum(&self, values: &[u64]) -> Vec<u64> {
        let contributions = self.exchange_all(vec![values.to_vec(); self.size()]);
        let mut result = vec![0; values.len()];
        for contribution in contributions {
            for (acc, value) in result.iter_mut().zip(contribution) {
                *acc += value;
            }
        }
        result
    }

    fn all_reduce_min(&self, value: i64) -> i64 {
        self.exchange_all(vec![value; self.size()])
            .into_iter()
            .min()
            .unwrap_or(value)
    }

    fn all_reduce_max(&self, value: i64) -> i64 {
        self.exchange_all(vec![value; self.size()])
            .into_iter()
            .max()
            .unwrap_or(value)
    }

    fn all_reduce_and(&self, value: bool) -> bool {
        self.exchange_all(vec![value; self.size()])
            .into_iter()
            .all(|v| v)
    }

    fn all_to_all_counts(&self, counts: &[usize]) -> Vec<usize> {
        assert_eq!(counts.len(), self.size());
        self.exchange_all(counts.to_vec())
    }

    fn all_to_all_varcount<T: Message>(&self, data: &[T], counts: &[usize]) -> Vec<T> {
        assert_eq!(counts.len(), self.size());
        assert_eq!(counts.iter().sum::<usize>(), data.len());

        let mut outgoing = Vec::with_capacity(counts.len());
        let mut rest = data;
        for &count in counts {
            let (chunk, tail) = rest.split_at(count);
            outgoing.push(chunk.to_vec());
            rest = tail;
        }

        self.exchange_all(outgoing).concat()
    }

    fn all_gather<T: Message>(&self, data: &[T]) -> Vec<T> {
        self.exchange_all(vec![data.to_vec(); self.size()]).concat()
    }

    fn exchange_neighbours<T: Message>(&self, to_prev: &[T], to_next: &[T]) -> (Vec<T>, Vec<T>) {
        let has_prev = self.rank > 0;
        let has_next = self.rank + 1 < self.size();

        if has_prev {
            self.send(self.rank - 1, to_prev.to_vec());
        }
        if has_next {
            self.send(self.rank + 1, to_next.to_vec());
        }

        let from_prev = if has_prev {
            self.receive(self.rank - 1)
        } else {
            Vec::new()
        };
        let from_next = if has_next {
            self.receive(self.rank + 1)
        } else {
            Vec::new()
        };

        (from_prev, from_next)
    }

    fn split(&self, color: usize) -> Result<Self> {
        let colors = self.exchange_all(vec![color; self.size()]);
        let members = colors
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == color)
            .map(|(rank, _)| rank)
            .collect::<Vec<_>>();

        // The lowest rank of each color creates the new group and hands out
        // the endpoints.
        let leader = members[0];
        if leader == self.rank {
            for (member, comm) in members.iter().zip(LocalCommunicator::group(members.len())) {
                self.send(*member, comm);
            }
        }

        Ok(self.receive::<LocalCommunicator>(leader))
    }
}

/// Run `f` on a group of `size` ranks, one thread per rank.
///
/// Returns the results ordered by rank. A panic on any rank is propagated.
pub fn run_local<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(LocalCommunicator) -> R + Sync,
    R: Send,
{
    let comms = LocalCommunicator::group(size);
    thread::scope(|scope| {
        let handles = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}
