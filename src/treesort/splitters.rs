//! Parallel selection of the splitters of a distributed tree sort.
//!
//! The curve is refined level by level into buckets. The global number of
//! octants per bucket is known to every process after an all-reduce, so every
//! process takes the same decisions. A cut that falls into a bucket further
//! from the ideal position than the tolerance marks the bucket for refinement.
//! The search ends once every cut is within the tolerance or sits in a bucket
//! on the deepest level.

use itertools::Itertools;

use crate::{
    communicator::Communicator,
    curve::RotationTable,
    octant::Octant,
    treesort::bucketing::{bucket, BucketInfo},
};

/// Local cut positions of a splitter search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitterSelection {
    /// `splitters[i]` is the end of the local range that goes to part `i`.
    /// The last entry is the local length.
    pub splitters: Vec<usize>,
    /// Number of cuts that were fixed outside the tolerance because their
    /// bucket could not be refined any further.
    pub fallbacks: usize,
}

impl SplitterSelection {
    /// Number of local octants that go to each part.
    pub fn counts(&self) -> Vec<usize> {
        std::iter::once(0)
            .chain(self.splitters.iter().copied())
            .tuple_windows()
            .map(|(begin, end)| end - begin)
            .collect()
    }
}

/// A bucket of the global histogram. `begin` and `end` of `info` are local.
#[derive(Copy, Clone, Debug)]
struct Candidate {
    info: BucketInfo,
    count: u64,
}

/// Smallest level with at least `nparts` buckets.
pub fn first_split_level(nparts: usize, dim: u8, max_depth: u8) -> u8 {
    let mut level = 0u8;
    while level < max_depth && (1u128 << (dim as u32 * level as u32)) < nparts as u128 {
        level += 1;
    }
    level
}

/// Split a bucket into its children in curve order.
///
/// Octants that end on or above the level of the bucket are kept in the
/// range of the first child so that the ranges stay contiguous.
fn refine(
    octants: &mut [Octant],
    info: BucketInfo,
    max_depth: u8,
    table: &RotationTable,
) -> Vec<BucketInfo> {
    let splitters = bucket(octants, info, max_depth, table);
    (0..table.num_children())
        .map(|pos| {
            let (begin, end) = splitters.child_range(pos);
            let begin = if pos == 0 { info.begin } else { begin };
            let cnum = table.child_at(info.rot_id, pos);
            BucketInfo::new(
                table.child_rotation(info.rot_id, cnum),
                info.level + 1,
                begin,
                end,
            )
        })
        .collect()
}

/// Select splitters that divide the distributed array into `nparts` parts of
/// nearly equal global size.
///
/// The local array is permuted by the bucketing but not sorted. All local
/// octants in `[splitters[i - 1], splitters[i])` precede all octants of the
/// following parts along the curve on every process, and equal octants always
/// end up in the same part. Every process of `comm` must call this function.
///
/// A cut lies within half of `load_flexibility` times the average part size
/// of its ideal position unless it falls into a bucket on the deepest level.
/// Such cuts are fixed at the nearest bucket boundary and counted as fallbacks.
pub fn select_splitters<C: Communicator>(
    octants: &mut [Octant],
    table: &RotationTable,
    max_depth: u8,
    load_flexibility: f64,
    nparts: usize,
    comm: &C,
) -> SplitterSelection {
    let _span = tracing::debug_span!("select_splitters", nparts).entered();

    let len = octants.len();
    let global = comm.all_reduce_sum(&[len as u64])[0];

    if nparts <= 1 || global == 0 {
        let mut splitters = vec![0; nparts.max(1)];
        if let Some(last) = splitters.last_mut() {
            *last = len;
        }
        return SplitterSelection {
            splitters,
            fallbacks: 0,
        };
    }

    let tolerance = 0.5 * load_flexibility * global as f64 / nparts as f64;

    let mut buckets = vec![BucketInfo::root(len)];
    for _ in 0..first_split_level(nparts, table.dim(), max_depth) {
        buckets = buckets
            .into_iter()
            .flat_map(|info| refine(octants, info, max_depth, table))
            .collect();
    }

    let counts = comm.all_reduce_sum(&buckets.iter().map(|b| b.len() as u64).collect_vec());
    let mut candidates = buckets
        .into_iter()
        .zip(counts)
        .map(|(info, count)| Candidate { info, count })
        .collect_vec();

    let mut rounds = 0;

    loop {
        rounds += 1;

        let scan = candidates
            .iter()
            .scan(0u64, |acc, c| {
                *acc += c.count;
                Some(*acc)
            })
            .collect_vec();

        // Boundary `b` is the cut in front of candidate `b`.
        let mut boundaries = Vec::with_capacity(nparts - 1);
        let mut marked = Vec::<usize>::new();
        let mut fallbacks = 0;

        for part in 1..nparts {
            let ideal = (part as u128 * global as u128 / nparts as u128) as u64;
            let loc = scan.partition_point(|&s| s < ideal);
            let before = if loc == 0 { 0 } else { scan[loc - 1] };
            let after = scan[loc];

            // Ties go to the earlier boundary.
            let (boundary, distance) = if ideal - before <= after - ideal {
                (loc, ideal - before)
            } else {
                (loc + 1, after - ideal)
            };
            boundaries.push(boundary);

            if distance as f64 > tolerance {
                if candidates[loc].info.level < max_depth {
                    if marked.last() != Some(&loc) {
                        marked.push(loc);
                    }
                } else {
                    fallbacks += 1;
                }
            }
        }

        if marked.is_empty() {
            if fallbacks > 0 {
                tracing::warn!(
                    fallbacks,
                    "splitters fixed outside the load tolerance on the deepest level"
                );
            }
            tracing::debug!(rounds, buckets = candidates.len(), "splitters selected");

            let mut splitters = boundaries
                .into_iter()
                .map(|b| candidates.get(b).map_or(len, |c| c.info.begin))
                .collect_vec();
            splitters.push(len);

            return SplitterSelection {
                splitters,
                fallbacks,
            };
        }

        // Refine the marked buckets and reduce the counts of their children.
        let mut refined = Vec::new();
        let mut local_counts = Vec::new();
        for (index, candidate) in candidates.iter().enumerate() {
            if marked.binary_search(&index).is_ok() {
                for child in refine(octants, candidate.info, max_depth, table) {
                    local_counts.push(child.len() as u64);
                    refined.push((child, None));
                }
            } else {
                refined.push((candidate.info, Some(candidate.count)));
            }
        }

        let mut reduced = comm.all_reduce_sum(&local_counts).into_iter();
        candidates = refined
            .into_iter()
            .map(|(info, count)| Candidate {
                info,
                count: count.or_else(|| reduced.next()).unwrap_or(0),
            })
            .collect();
    }
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::{first_split_level, select_splitters};
    use crate::{
        communicator::{local::run_local, Communicator},
        curve::{Curve, RotationTable},
        octant::Octant,
        tools::{generate_random_cells, seeded_rng},
    };

    #[test]
    fn test_first_split_level() {
        assert_eq!(first_split_level(1, 3, 10), 0);
        assert_eq!(first_split_level(2, 3, 10), 1);
        assert_eq!(first_split_level(8, 3, 10), 1);
        assert_eq!(first_split_level(9, 3, 10), 2);
        assert_eq!(first_split_level(17, 2, 10), 3);
        assert_eq!(first_split_level(1000, 3, 2), 2);
    }

    #[test]
    fn test_splitters_balance_the_load() {
        let nparts = 4;
        let results = run_local(nparts, |comm| {
            let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
            let mut rng = seeded_rng(10 + comm.rank());
            let mut octants = generate_random_cells(1000, 3, 12, &mut rng);
            let selection = select_splitters(&mut octants, &table, 12, 0.1, nparts, &comm);

            assert_eq!(selection.splitters.len(), nparts);
            assert_eq!(*selection.splitters.last().unwrap(), octants.len());
            assert!(selection.splitters.iter().tuple_windows().all(|(a, b)| a <= b));
            assert_eq!(selection.fallbacks, 0);

            // Everything in front of a cut precedes everything behind it.
            let counts = selection.counts();
            let mut begin = 0;
            let mut parts = Vec::new();
            for count in counts.iter() {
                parts.push(octants[begin..begin + count].to_vec());
                begin += count;
            }
            (parts, counts)
        });

        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let global = 1000 * nparts;
        for part in 0..nparts {
            let share = results.iter().map(|(_, c)| c[part]).sum::<usize>();
            let ideal = global as f64 / nparts as f64;
            assert!((share as f64 - ideal).abs() <= 0.1 * ideal + 1.0);
        }
        for part in 1..nparts {
            let earlier = results.iter().flat_map(|(p, _)| p[part - 1].iter());
            let later = results.iter().flat_map(|(p, _)| p[part].iter()).collect_vec();
            for a in earlier {
                assert!(later.iter().all(|b| table.compare(a, b).is_lt()));
            }
        }
    }

    #[test]
    fn test_identical_octants_fall_back() {
        let results = run_local(4, |comm| {
            let table = RotationTable::new(Curve::Morton, 2).unwrap();
            let octant = Octant::new([3, 5, 0], 4, 2, 4).unwrap();
            let mut octants = vec![octant; 50];
            select_splitters(&mut octants, &table, 4, 0.1, 4, &comm)
        });

        for selection in results {
            assert_eq!(selection.fallbacks, 3);
            assert_eq!(selection.counts().iter().sum::<usize>(), 50);
            // All copies end up in a single part.
            assert_eq!(selection.counts().iter().filter(|&&c| c > 0).count(), 1);
        }
    }

    #[test]
    fn test_single_part_and_empty_input() {
        let results = run_local(3, |comm| {
            let table = RotationTable::new(Curve::Hilbert, 2).unwrap();
            let mut empty = Vec::new();
            let none = select_splitters(&mut empty, &table, 6, 0.1, 3, &comm);

            let mut octants = generate_random_cells(10, 2, 6, &mut seeded_rng(comm.rank()));
            let single = select_splitters(&mut octants, &table, 6, 0.1, 1, &comm);
            (none, single)
        });

        for (none, single) in results {
            assert_eq!(none.splitters, vec![0, 0, 0]);
            assert_eq!(single.splitters, vec![10]);
        }
    }
}
