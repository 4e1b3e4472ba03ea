//! Dynamic repartitioning that reduces the number of faces on process boundaries.
//!
//! Every process except the last tries to take over up to `slack` octants
//! from the head of the next process. The boundary faces of the grown range
//! are updated incrementally, one added octant at a time, and the shift with
//! the smallest global minimum of boundary faces is applied. This is a local
//! heuristic search. It does not find a global optimum.

use crate::{
    communicator::Communicator,
    constants::BAL_CONST,
    curve::RotationTable,
    error::{OctreeError, Result},
    octant::Octant,
    tools::find_overlapping,
};

/// Global statistics of the number of boundary faces per process.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FaceStats {
    /// Smallest number of boundary faces of a process.
    pub min: i64,
    /// Largest number of boundary faces of a process.
    pub max: i64,
    /// Average number of boundary faces per process.
    pub mean: f64,
}

impl FaceStats {
    fn reduce<C: Communicator>(faces: i64, comm: &C) -> Self {
        let min = comm.all_reduce_min(faces);
        let max = comm.all_reduce_max(faces);
        let sum = comm.all_reduce_sum(&[faces.max(0) as u64])[0];
        Self {
            min,
            max,
            mean: sum as f64 / comm.size() as f64,
        }
    }
}

/// Result of [dynamic_partition].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RepartitionOutcome {
    /// Number of octants each process took over from the next one.
    pub shift: usize,
    /// Boundary faces of the original partition.
    pub before: FaceStats,
    /// Boundary faces of the returned partition.
    pub after: FaceStats,
}

/// Weight of a face between octants whose levels differ by `level_difference`.
///
/// An equal level face counts [BAL_CONST]. A face shared with a coarser
/// octant covers a quarter of the coarse face. In a 2:1 balanced tree the
/// difference is at most one, larger differences are weighted like one.
pub fn face_weight(level_difference: u8) -> i64 {
    match level_difference {
        0 => BAL_CONST,
        _ => BAL_CONST / 4,
    }
}

/// Boundary faces of a sorted range of octants, weighted by [BAL_CONST].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundaryFaces {
    counts: Vec<i64>,
    total: i64,
}

impl BoundaryFaces {
    /// Count, for every octant of `range`, the face neighbours that no octant of
    /// `range` overlaps.
    pub fn count(range: &[Octant], table: &RotationTable) -> Self {
        let counts = range
            .iter()
            .map(|octant| {
                let outside = octant
                    .face_neighbours()
                    .iter()
                    .filter(|neighbour| find_overlapping(range, neighbour, table).is_none())
                    .count() as i64;
                BAL_CONST * outside
            })
            .collect::<Vec<_>>();
        let total = counts.iter().sum();
        Self { counts, total }
    }

    /// Update the counts after the last octant of `range` was appended.
    ///
    /// A face neighbour of the new octant outside of the range adds a face.
    /// A neighbour inside the range removes the face of the octant that owns
    /// it: [face_weight] for an owner that is not finer than the new octant,
    /// a full face otherwise.
    pub fn grow(&mut self, range: &[Octant], table: &RotationTable) {
        debug_assert_eq!(range.len(), self.counts.len() + 1);
        let Some((added, known)) = range.split_last() else {
            return;
        };

        let mut own = 0;
        for neighbour in added.face_neighbours() {
            match find_overlapping(known, &neighbour, table) {
                None => {
                    own += BAL_CONST;
                    self.total += BAL_CONST;
                }
                Some(index) => {
                    let owner = known[index];
                    let weight = if owner.level() <= added.level() {
                        face_weight(added.level() - owner.level())
                    } else {
                        BAL_CONST
                    };
                    self.counts[index] -= weight;
                    self.total -= weight;
                }
            }
        }
        self.counts.push(own.max(0));
    }

    /// Weighted face count of each octant.
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    /// Sum of the weighted face counts.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Number of boundary faces.
    pub fn faces(&self) -> i64 {
        self.total / BAL_CONST
    }
}

/// Move process boundaries along the curve to reduce boundary faces.
///
/// `partition` is the local part of a globally sorted linear octree. The
/// slack is `floor(slack_fraction * n / p)` for `n` octants on `p` processes
/// and must be smaller than every local size. Otherwise every process returns
/// an error and the partition is unchanged. If no shift lowers the global
/// minimum of boundary faces the partition is left as it is.
pub fn dynamic_partition<C: Communicator>(
    partition: &mut Vec<Octant>,
    table: &RotationTable,
    slack_fraction: f64,
    comm: &C,
) -> Result<RepartitionOutcome> {
    let _span = tracing::info_span!("dynamic_partition", rank = comm.rank()).entered();

    let (rank, size) = (comm.rank(), comm.size());
    let global = comm.all_reduce_sum(&[partition.len() as u64])[0];

    let valid_fraction = (0.0..=1.0).contains(&slack_fraction);
    let slack = if valid_fraction {
        (slack_fraction * global as f64 / size as f64).floor() as usize
    } else {
        0
    };

    let local = if !valid_fraction {
        Err(OctreeError::InvalidSlackFraction(slack_fraction))
    } else if slack >= partition.len() {
        Err(OctreeError::SlackTooLarge {
            slack,
            local: partition.len(),
        })
    } else {
        Ok(())
    };
    if !comm.all_reduce_and(local.is_ok()) {
        return Err(local.err().unwrap_or(OctreeError::RemoteFailure));
    }

    // Padded buffer: tail of the previous process, local octants, head of the next process.
    let len = partition.len();
    let (tail, head) = comm.exchange_neighbours(&partition[..slack], &partition[len - slack..]);
    let begin = tail.len();
    let ghosted = [tail.as_slice(), partition.as_slice(), head.as_slice()].concat();
    let grows = rank + 1 < size;

    let mut faces = BoundaryFaces::count(&ghosted[begin..begin + len], table);

    let before = FaceStats::reduce(faces.faces(), comm);
    tracing::debug!(slack, min = before.min, max = before.max, "initial boundary faces");

    let mut best = (0, before);
    for added in 1..=slack {
        if grows {
            faces.grow(&ghosted[begin..begin + len + added], table);
        }

        let stats = FaceStats::reduce(faces.faces(), comm);
        if stats.min < best.1.min {
            best = (added, stats);
        }
    }

    let (shift, after) = best;
    if shift > 0 {
        if rank > 0 {
            partition.drain(..shift);
        }
        if grows {
            partition.extend_from_slice(&head[..shift]);
        }
    }

    tracing::info!(
        shift,
        min = after.min,
        max = after.max,
        mean = after.mean,
        "dynamic repartitioning finished"
    );

    Ok(RepartitionOutcome {
        shift,
        before,
        after,
    })
}
