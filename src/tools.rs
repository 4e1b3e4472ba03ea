//! Utility routines.

use std::cmp::Ordering;

use itertools::{izip, Itertools};
use num::traits::Zero;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    communicator::{Communicator, Message},
    curve::RotationTable,
    octant::Octant,
};

/// Gather a distributed array on all processes.
pub fn gather_to_all<T: Message, C: Communicator>(arr: &[T], comm: &C) -> Vec<T> {
    comm.all_gather(arr)
}

/// Gather a distributed array on the first rank.
///
/// The result is a `Vec<T>` on rank 0 and `None` on all other ranks.
pub fn gather_to_root<T: Message, C: Communicator>(arr: &[T], comm: &C) -> Option<Vec<T>> {
    let size = comm.size();
    let mut counts = vec![0; size];
    counts[0] = arr.len();

    let gathered = comm.all_to_all_varcount(arr, &counts);

    if comm.rank() == 0 {
        Some(gathered)
    } else {
        None
    }
}

/// Get the global size of a distributed array.
pub fn global_size<T, C: Communicator>(arr: &[T], comm: &C) -> usize {
    comm.all_reduce_sum(&[arr.len() as u64])[0] as usize
}

/// Perform a global inclusive cumulative sum operation.
///
/// For the array `[1, 3, 5, 7]` the output will be `[1, 4, 9, 16]`.
pub fn global_inclusive_cumsum<T: Message + Zero, C: Communicator>(arr: &[T], comm: &C) -> Vec<T> {
    let mut scan: Vec<T> = arr
        .iter()
        .scan(<T as Zero>::zero(), |state, x| {
            *state = *x + *state;
            Some(*state)
        })
        .collect_vec();

    let local_total = scan.last().copied().unwrap_or_else(T::zero);
    let totals = comm.all_gather(&[local_total]);
    let offset = totals[..comm.rank()]
        .iter()
        .fold(T::zero(), |acc, &x| acc + x);

    for elem in &mut scan {
        *elem = *elem + offset;
    }

    scan
}

/// Communicate the first element of each local array back to the previous rank.
///
/// Returns the first element of the next rank, or `None` on the last rank or
/// if the next rank holds no elements.
pub fn communicate_back<T: Message, C: Communicator>(arr: &[T], comm: &C) -> Option<T> {
    let first = arr.first().map(std::slice::from_ref).unwrap_or(&[]);
    let (_, from_next) = comm.exchange_neighbours(first, &[]);
    from_next.first().copied()
}

/// Distribute a sorted sequence into bins.
///
/// For an array with n elements to be distributed into p bins,
/// the array `bins` has p elements. The bins are defined by half-open intervals
/// of the form [b_j, b_{j+1})). The final bin is the half-open interval [b_{p-1}, \infty).
/// It is assumed that the bins and the elements are both sorted sequences and that
/// every element has an associated bin.
/// The function returns a p element array with the counts of how many elements go to each bin.
pub fn sort_to_bins<T: Ord>(sorted_keys: &[T], bins: &[T]) -> Vec<usize> {
    let nbins = bins.len();
    let mut bin_counts = vec![0; nbins];

    if sorted_keys.is_empty() {
        return bin_counts;
    }

    // Make sure that the smallest element of the sorted keys fits into the bins.
    debug_assert!(bins[0] <= sorted_keys[0]);

    let mut bin = 0;
    for key in sorted_keys {
        // Move the bin forward until it fits. The last bin takes everything.
        while bin + 1 < nbins && bins[bin + 1] <= *key {
            bin += 1;
        }
        bin_counts[bin] += 1;
    }

    bin_counts
}

/// Check that a sorted local array has no duplicates and no ancestor pairs.
pub fn is_linear(sorted: &[Octant]) -> bool {
    sorted
        .iter()
        .tuple_windows()
        .all(|(a, b)| !a.is_ancestor_or_equal(b))
}

/// Check that a local array is a sorted, complete and linear octree.
pub fn is_complete_linear(sorted: &[Octant], table: &RotationTable) -> bool {
    let Some(first) = sorted.first() else {
        return false;
    };
    let volume = sorted.iter().map(|o| o.volume()).sum::<u128>();

    table.is_sorted(sorted)
        && is_linear(sorted)
        && volume == Octant::domain_volume(first.dim(), first.max_depth())
}

/// Find the octant of a sorted linear array that overlaps `target`.
///
/// Returns the index of the ancestor of `target` if there is one, otherwise
/// the index of the first descendant of `target` (or of `target` itself).
/// Returns `None` if no octant of the array overlaps `target`.
pub fn find_overlapping(sorted: &[Octant], target: &Octant, table: &RotationTable) -> Option<usize> {
    let index = sorted.partition_point(|o| table.compare(o, target) == Ordering::Less);

    if index < sorted.len() && target.is_ancestor_or_equal(&sorted[index]) {
        return Some(index);
    }

    if index > 0 && sorted[index - 1].is_ancestor(target) {
        return Some(index - 1);
    }

    None
}

/// Check the 2:1 balance condition of a sorted, complete, linear octree.
///
/// Any two leaves that share a face, an edge or a corner may differ by at
/// most one level.
pub fn is_balanced(sorted: &[Octant], table: &RotationTable) -> bool {
    // A violation is seen from the finer of the two leaves. Its same level
    // neighbour then lies inside the coarser leaf.
    sorted.iter().all(|leaf| {
        leaf.neighbours().iter().all(|neighbour| {
            match find_overlapping(sorted, neighbour, table) {
                Some(index) if sorted[index].level() < neighbour.level() => {
                    neighbour.level() - sorted[index].level() <= 1
                }
                _ => true,
            }
        })
    })
}

/// First element of the next rank that holds any elements.
///
/// Found by gathering the first elements of all ranks, so empty ranks in
/// between are skipped.
fn next_nonempty_first<C: Communicator>(arr: &[Octant], comm: &C) -> Option<Octant> {
    let firsts = comm.all_gather(arr.first().map(std::slice::from_ref).unwrap_or(&[]));
    let counts = comm.all_gather(&[arr.len() as u64]);
    counts[comm.rank() + 1..]
        .iter()
        .position(|&c| c > 0)
        .map(|offset| {
            let nonempty_before = counts[..=comm.rank() + offset]
                .iter()
                .filter(|&&c| c > 0)
                .count();
            firsts[nonempty_before]
        })
}

/// Check if a distributed array is sorted along the curve.
pub fn is_sorted_array<C: Communicator>(arr: &[Octant], table: &RotationTable, comm: &C) -> bool {
    let mut sorted = table.is_sorted(arr);

    if let (Some(last), Some(next_first)) = (arr.last(), next_nonempty_first(arr, comm)) {
        sorted = sorted && table.compare(last, &next_first) != Ordering::Greater;
    }

    comm.all_reduce_and(sorted)
}

/// Check if a distributed array is sorted and linear.
///
/// Empty ranks are allowed.
pub fn is_linear_tree<C: Communicator>(arr: &[Octant], table: &RotationTable, comm: &C) -> bool {
    let mut linear = table.is_sorted(arr) && is_linear(arr);

    if let (Some(last), Some(next_first)) = (arr.last(), next_nonempty_first(arr, comm)) {
        linear = linear
            && table.compare(last, &next_first) == Ordering::Less
            && !last.is_ancestor(&next_first);
    }

    comm.all_reduce_and(linear)
}

/// Check if a distributed array is a sorted, complete and linear octree.
pub fn is_complete_linear_tree<C: Communicator>(
    arr: &[Octant],
    table: &RotationTable,
    comm: &C,
) -> bool {
    let linear = is_linear_tree(arr, table, comm);

    let volume = arr.iter().map(|o| o.volume()).sum::<u128>();
    // Volumes are reduced in 32 bit limbs so that the sums cannot overflow.
    let limbs = comm.all_reduce_sum(&[
        (volume & 0xffff_ffff) as u64,
        ((volume >> 32) & 0xffff_ffff) as u64,
        (volume >> 64) as u64,
    ]);
    let global_volume =
        limbs[0] as u128 + ((limbs[1] as u128) << 32) + ((limbs[2] as u128) << 64);

    // Empty ranks contribute a zero dimension.
    let grid = arr
        .first()
        .map(|o| [o.dim(), o.max_depth()])
        .unwrap_or([0, 0]);
    let grids = comm.all_gather(&grid);
    let expected = grids
        .chunks(2)
        .find(|grid| grid[0] != 0)
        .map(|grid| Octant::domain_volume(grid[0], grid[1]));

    linear && expected == Some(global_volume)
}

/// Check the 2:1 balance condition of a distributed complete linear octree.
pub fn is_balanced_tree<C: Communicator>(arr: &[Octant], table: &RotationTable, comm: &C) -> bool {
    let global = gather_to_all(arr, comm);
    is_balanced(&global, table)
}

/// Generate random octants of random levels for testing.
pub fn generate_random_octants<R: Rng>(
    noctants: usize,
    dim: u8,
    max_depth: u8,
    rng: &mut R,
) -> Vec<Octant> {
    (0..noctants)
        .map(|_| {
            let level = rng.gen_range(1..=max_depth);
            let cells = 1u32 << level;
            let shift = max_depth - level;
            let mut anchor = [0u32; 3];
            for coord in anchor.iter_mut().take(dim as usize) {
                *coord = rng.gen_range(0..cells) << shift;
            }
            Octant::from_parts(anchor, level, dim, max_depth)
        })
        .collect()
}

/// Generate distinct random octants on the deepest level for testing.
pub fn generate_random_cells<R: Rng>(
    ncells: usize,
    dim: u8,
    max_depth: u8,
    rng: &mut R,
) -> Vec<Octant> {
    let extent = 1usize << max_depth;

    let xindices = rand::seq::index::sample(rng, extent, ncells);
    let yindices = rand::seq::index::sample(rng, extent, ncells);
    let zindices = rand::seq::index::sample(rng, extent, ncells);

    izip!(xindices.iter(), yindices.iter(), zindices.iter())
        .map(|(x, y, z)| {
            let z = if dim == 2 { 0 } else { z as u32 };
            Octant::from_parts([x as u32, y as u32, z], max_depth, dim, max_depth)
        })
        .collect()
}

/// Get a seeded rng
pub fn seeded_rng(seed: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed as u64)
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::{
        communicate_back, find_overlapping, gather_to_root, global_inclusive_cumsum,
        is_balanced, is_complete_linear, is_complete_linear_tree, is_linear_tree,
        is_sorted_array, sort_to_bins,
    };
    use crate::{
        communicator::{local::run_local, Communicator},
        curve::{Curve, RotationTable},
        octant::Octant,
    };

    /// Uniform tree of the given level in curve order.
    fn uniform_tree(table: &RotationTable, level: u8, max_depth: u8) -> Vec<Octant> {
        let mut octants = vec![Octant::root(table.dim(), max_depth)];
        for _ in 0..level {
            octants = octants.iter().flat_map(|o| o.children()).collect_vec();
        }
        octants.sort_by(|a, b| table.compare(a, b));
        octants
    }

    #[test]
    fn test_sort_to_bins() {
        let elems = (0..100).collect_vec();
        let bins = [0, 17, 55];

        let counts = sort_to_bins(&elems, &bins);

        assert_eq!(counts[0], 17);
        assert_eq!(counts[1], 38);
        assert_eq!(counts[2], 45);

        assert_eq!(sort_to_bins(&[5, 5, 5], &[0, 5, 5]), vec![0, 0, 3]);
    }

    #[test]
    fn test_find_overlapping() {
        let table = RotationTable::new(Curve::Hilbert, 2).unwrap();
        let tree = uniform_tree(&table, 2, 4);

        // Same level.
        let target = tree[5];
        assert_eq!(find_overlapping(&tree, &target, &table), Some(5));

        // A descendant of a leaf finds the leaf.
        let descendant = target.child(2).child(1);
        assert_eq!(find_overlapping(&tree, &descendant, &table), Some(5));

        // An ancestor finds its first descendant along the curve.
        let ancestor = target.parent();
        let index = find_overlapping(&tree, &ancestor, &table).unwrap();
        assert!(ancestor.is_ancestor(&tree[index]));
        assert!(index == 0 || !ancestor.is_ancestor(&tree[index - 1]));

        // Nothing overlaps outside of a partial range.
        assert_eq!(find_overlapping(&tree[..4], &tree[10], &table), None);
    }

    #[test]
    fn test_is_balanced() {
        let table = RotationTable::new(Curve::Morton, 2).unwrap();
        let root = Octant::root(2, 3);

        // Refine one corner of the root down to level 3.
        let mut leaves = root.children()[1..].to_vec();
        let quarter = root.child(0);
        leaves.extend_from_slice(&quarter.children()[..3]);
        leaves.extend(quarter.child(3).children());
        leaves.sort_by(|a, b| table.compare(a, b));

        assert!(is_complete_linear(&leaves, &table));
        assert!(!is_balanced(&leaves, &table));

        let uniform = uniform_tree(&table, 2, 3);
        assert!(is_balanced(&uniform, &table));
    }

    #[test]
    fn test_distributed_checks() {
        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let tree = uniform_tree(&table, 2, 4);

        run_local(3, |comm| {
            // Rank 1 holds no elements.
            let local = match comm.rank() {
                0 => &tree[..20],
                1 => &tree[20..20],
                _ => &tree[20..],
            };

            assert!(is_sorted_array(local, &table, &comm));
            assert!(is_linear_tree(local, &table, &comm));
            assert!(is_complete_linear_tree(local, &table, &comm));

            let next = communicate_back(local, &comm);
            match comm.rank() {
                0 => assert!(next.is_none()),
                1 => assert_eq!(next, Some(tree[20])),
                _ => assert!(next.is_none()),
            }

            // Order across an empty rank is checked as well.
            let swapped = match comm.rank() {
                0 => &tree[20..21],
                1 => &tree[20..20],
                _ => &tree[..1],
            };
            assert!(!is_sorted_array(swapped, &table, &comm));
            assert!(!is_linear_tree(swapped, &table, &comm));

            let gathered = gather_to_root(local, &comm);
            if comm.rank() == 0 {
                assert_eq!(gathered.unwrap(), tree);
            } else {
                assert!(gathered.is_none());
            }

            // Dropping an element breaks completeness but not linearity.
            let partial = if comm.rank() == 2 { &local[1..] } else { local };
            assert!(is_linear_tree(partial, &table, &comm));
            assert!(!is_complete_linear_tree(partial, &table, &comm));
        });
    }

    #[test]
    fn test_global_inclusive_cumsum() {
        let results = run_local(3, |comm| {
            let arr = vec![1u64; comm.rank() + 1];
            global_inclusive_cumsum(&arr, &comm)
        });
        assert_eq!(results, vec![vec![1], vec![2, 3], vec![4, 5, 6]]);
    }
}
