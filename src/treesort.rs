//! Sequential space filling curve tree sort.
//!
//! The octants are sorted by recursively bucketing them into the children of
//! their common ancestor in the order given by the curve rotation table. The
//! same traversal can emit the leaves of a complete linear octree (construct)
//! and, with the help of the balance closure, of a complete 2:1 balanced
//! linear octree.

pub mod balance;
pub mod bucketing;
pub mod parallel;
pub mod splitters;

use crate::{
    config::TreeSortConfig,
    curve::RotationTable,
    error::{OctreeError, Result},
    octant::Octant,
};

use balance::balance_closure;
use bucketing::{bucket, BucketInfo};

/// Trees produced by [tree_sort] next to the sorted input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeSortOutput {
    /// Complete linear octree. Empty unless construction or balancing was requested.
    pub construct: Vec<Octant>,
    /// Complete 2:1 balanced linear octree. Empty unless balancing was requested.
    pub balanced: Vec<Octant>,
}

/// When a child bucket stops being subdivided and becomes a leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LeafRule {
    /// No leaves are emitted. Buckets are only subdivided until sorted.
    Sort,
    /// A bucket with at most `k` octants becomes a leaf.
    Grain(usize),
    /// A bucket becomes a leaf once it contains no strict descendant.
    Finest,
}

enum Task {
    Split {
        info: BucketInfo,
        node: Octant,
        rule: LeafRule,
    },
    Leaf(Octant),
}

/// Sort `octants` along the curve and optionally construct and balance an octree.
///
/// The input is sorted in place. With [crate::config::SortOptions::REMOVE_DUPLICATES]
/// duplicates are removed and of an ancestor and its descendant only the
/// descendant is kept. The constructed trees are returned.
pub fn tree_sort(
    octants: &mut Vec<Octant>,
    table: &RotationTable,
    config: &TreeSortConfig,
) -> Result<TreeSortOutput> {
    check_input(octants, table, config)?;
    Ok(sort_local(octants, table, config))
}

/// Validate the configuration, the table and the octants.
pub(crate) fn check_input(
    octants: &[Octant],
    table: &RotationTable,
    config: &TreeSortConfig,
) -> Result<()> {
    config.validate()?;
    if table.dim() != config.dim {
        return Err(OctreeError::MalformedRotation(format!(
            "table is built for dimension {}, the tree has dimension {}",
            table.dim(),
            config.dim
        )));
    }
    if let Some(curve) = table.curve() {
        if curve != config.curve {
            return Err(OctreeError::MalformedRotation(format!(
                "table is built for the {:?} curve, the tree uses the {:?} curve",
                curve, config.curve
            )));
        }
    }
    for octant in octants {
        octant.check_parameters(config.dim, config.max_depth)?;
    }
    Ok(())
}

/// [tree_sort] without input validation.
pub(crate) fn sort_local(
    octants: &mut Vec<Octant>,
    table: &RotationTable,
    config: &TreeSortConfig,
) -> TreeSortOutput {
    let options = config.options;
    let (dim, max_depth) = (config.dim, config.max_depth);

    let rule = if options.construct() {
        LeafRule::Grain(config.k)
    } else {
        LeafRule::Sort
    };

    let construct = sort_tree(octants, table, dim, max_depth, rule);

    if options.remove_duplicates() {
        remove_duplicates(octants);
    }

    let balanced = if options.balance() {
        let mut closure = balance_closure(&construct);
        tracing::debug!(
            leaves = construct.len(),
            closure = closure.len(),
            "balance closure"
        );
        sort_tree(&mut closure, table, dim, max_depth, LeafRule::Finest)
    } else {
        Vec::new()
    };

    debug_assert!(table.is_sorted(octants));

    TreeSortOutput {
        construct,
        balanced,
    }
}

/// Sort `octants` along the curve and return the leaves selected by `rule`.
///
/// The traversal uses an explicit stack. Children are pushed in reverse curve
/// order so that leaves are emitted in curve order.
pub(crate) fn sort_tree(
    octants: &mut [Octant],
    table: &RotationTable,
    dim: u8,
    max_depth: u8,
    rule: LeafRule,
) -> Vec<Octant> {
    let mut leaves = Vec::new();

    if octants.is_empty() {
        return leaves;
    }

    let mut stack = vec![Task::Split {
        info: BucketInfo::root(octants.len()),
        node: Octant::root(dim, max_depth),
        rule,
    }];

    while let Some(task) = stack.pop() {
        let (info, node, rule) = match task {
            Task::Leaf(leaf) => {
                leaves.push(leaf);
                continue;
            }
            Task::Split { info, node, rule } => (info, node, rule),
        };

        let splitters = bucket(octants, info, max_depth, table);
        let child_level = info.level + 1;

        for pos in (0..table.num_children()).rev() {
            let (begin, end) = splitters.child_range(pos);
            let cnum = table.child_at(info.rot_id, pos);
            let child_info = BucketInfo::new(
                table.child_rotation(info.rot_id, cnum),
                child_level,
                begin,
                end,
            );
            let child = node.child(cnum);
            let range = &octants[begin..end];
            let can_refine = child_level < max_depth;

            let refine = can_refine
                && match rule {
                    LeafRule::Sort => false,
                    LeafRule::Grain(k) => range.len() > k,
                    LeafRule::Finest => range.iter().any(|o| o.level() > child_level),
                };

            if refine {
                stack.push(Task::Split {
                    info: child_info,
                    node: child,
                    rule,
                });
                continue;
            }

            if rule != LeafRule::Sort {
                stack.push(Task::Leaf(child));
            }

            if can_refine && needs_sorting(range) {
                stack.push(Task::Split {
                    info: child_info,
                    node: child,
                    rule: LeafRule::Sort,
                });
            }
        }
    }

    leaves
}

/// A range needs further bucketing unless all its elements are equal.
fn needs_sorting(range: &[Octant]) -> bool {
    match range.first() {
        Some(first) => range.iter().any(|o| o != first),
        None => false,
    }
}

/// Remove duplicates and ancestors from a sorted array.
///
/// Of an ancestor and its descendant only the descendant is kept.
pub fn remove_duplicates(sorted: &mut Vec<Octant>) {
    sorted.dedup();

    let mut result = Vec::<Octant>::with_capacity(sorted.len());
    for &octant in sorted.iter() {
        while result.last().is_some_and(|last| last.is_ancestor(&octant)) {
            result.pop();
        }
        result.push(octant);
    }

    *sorted = result;
}

/// Find the first (`minimum == true`) or last octant along the curve without a full sort.
///
/// Only the first or last non-empty bucket is descended into. The array is
/// permuted by the bucketing.
pub fn local_optimum(
    octants: &mut [Octant],
    table: &RotationTable,
    minimum: bool,
) -> Option<Octant> {
    let max_depth = octants.first()?.max_depth();
    let mut info = BucketInfo::root(octants.len());

    loop {
        let first = octants[info.begin];
        if info.len() == 1
            || info.level >= max_depth
            || (info.len() == 2 && first == octants[info.begin + 1])
        {
            return Some(first);
        }

        let splitters = bucket(octants, info, max_depth, table);

        if minimum && splitters.ancestors > info.begin {
            return Some(octants[info.begin]);
        }

        let mut nonempty = (0..table.num_children()).filter(|&pos| {
            let (begin, end) = splitters.child_range(pos);
            begin < end
        });
        let pos = if minimum {
            nonempty.next()
        } else {
            nonempty.last()
        };

        match pos {
            Some(pos) => {
                let (begin, end) = splitters.child_range(pos);
                let cnum = table.child_at(info.rot_id, pos);
                info = BucketInfo::new(
                    table.child_rotation(info.rot_id, cnum),
                    info.level + 1,
                    begin,
                    end,
                );
            }
            // Only octants equal to the bucket itself are left.
            None => return Some(octants[info.begin]),
        }
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use itertools::Itertools;
    use rand::seq::SliceRandom;

    use super::{local_optimum, remove_duplicates, tree_sort};
    use crate::{
        config::{SortOptions, TreeSortConfig},
        curve::{Curve, RotationTable},
        error::OctreeError,
        octant::Octant,
        tools::{
            generate_random_octants, is_balanced, is_complete_linear, is_linear, seeded_rng,
        },
    };

    fn clustered_points() -> Vec<Octant> {
        [
            [0, 0, 0],
            [1, 0, 0],
            [0, 1, 0],
            [0, 0, 1],
            [1, 1, 1],
            [7, 7, 7],
            [6, 7, 7],
            [7, 6, 7],
            [7, 7, 6],
        ]
        .iter()
        .map(|&anchor| Octant::new(anchor, 3, 3, 3).unwrap())
        .collect_vec()
    }

    #[test]
    fn test_sort_matches_comparison_sort() {
        for (curve, dim) in [(Curve::Hilbert, 3), (Curve::Morton, 3), (Curve::Hilbert, 2)] {
            let table = RotationTable::new(curve, dim).unwrap();
            let config = TreeSortConfig::new(dim, 10).with_curve(curve);
            let mut rng = seeded_rng(3);

            let mut octants = generate_random_octants(2000, dim, 10, &mut rng);
            let mut expected = octants.clone();
            expected.sort_by(|a, b| table.compare(a, b));

            let output = tree_sort(&mut octants, &table, &config).unwrap();
            assert_eq!(octants, expected);
            assert!(output.construct.is_empty());
            assert!(output.balanced.is_empty());

            // Sorting a sorted array is a no-op.
            tree_sort(&mut octants, &table, &config).unwrap();
            assert_eq!(octants, expected);

            // Any permutation gives the same result.
            octants.shuffle(&mut rng);
            tree_sort(&mut octants, &table, &config).unwrap();
            assert_eq!(octants, expected);
        }
    }

    #[test]
    fn test_remove_duplicates() {
        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let config =
            TreeSortConfig::new(3, 8).with_options(SortOptions::REMOVE_DUPLICATES);
        let mut rng = seeded_rng(4);

        let mut octants = generate_random_octants(500, 3, 8, &mut rng);
        // Duplicates and a chain of ancestors of one octant.
        octants.extend_from_slice(&octants.clone()[..100]);
        let deep = Octant::new([8, 16, 24], 8, 3, 8).unwrap();
        for level in 0..=8 {
            octants.push(deep.ancestor(level));
        }
        octants.push(deep);

        tree_sort(&mut octants, &table, &config).unwrap();

        assert!(table.is_sorted(&octants));
        assert!(is_linear(&octants));
        assert!(octants.contains(&deep));
        for (a, b) in octants.iter().tuple_combinations() {
            assert!(a != b && !a.is_ancestor(b) && !b.is_ancestor(a));
        }
    }

    #[test]
    fn test_remove_duplicates_keeps_finer_octant() {
        let parent = Octant::new([0, 0, 0], 1, 3, 4).unwrap();
        let child = parent.child(5);
        let mut sorted = vec![parent, parent, child, child];
        remove_duplicates(&mut sorted);
        assert_eq!(sorted, vec![child]);
    }

    #[test]
    fn test_construct_is_complete() {
        for (curve, dim) in [(Curve::Hilbert, 3), (Curve::Morton, 2)] {
            let table = RotationTable::new(curve, dim).unwrap();
            let mut rng = seeded_rng(5);
            for k in [1, 4] {
                let config = TreeSortConfig::new(dim, 8)
                    .with_curve(curve)
                    .with_grain(k)
                    .with_options(SortOptions::CONSTRUCT_OCTREE);
                let mut octants = generate_random_octants(300, dim, 8, &mut rng);
                let output = tree_sort(&mut octants, &table, &config).unwrap();

                assert!(table.is_sorted(&output.construct));
                assert!(is_complete_linear(&output.construct, &table));
                assert!(output.balanced.is_empty());

                // No leaf below the deepest level holds more than k input octants.
                for leaf in &output.construct {
                    if leaf.level() < 8 {
                        let count = octants
                            .iter()
                            .filter(|o| leaf.is_ancestor_or_equal(o))
                            .count();
                        assert!(count <= k);
                    }
                }
            }
        }
    }

    #[test]
    fn test_balance() {
        for (curve, dim) in [(Curve::Hilbert, 3), (Curve::Hilbert, 2), (Curve::Morton, 3)] {
            let table = RotationTable::new(curve, dim).unwrap();
            let config = TreeSortConfig::new(dim, 7)
                .with_curve(curve)
                .with_options(SortOptions::BALANCE_OCTREE | SortOptions::REMOVE_DUPLICATES);
            let mut rng = seeded_rng(6);
            let mut octants = generate_random_octants(40, dim, 7, &mut rng);

            let output = tree_sort(&mut octants, &table, &config).unwrap();

            assert!(!output.construct.is_empty());
            assert!(is_complete_linear(&output.balanced, &table));
            assert!(is_balanced(&output.balanced, &table));
            assert!(output.balanced.len() >= output.construct.len());

            // The balanced tree refines the constructed tree.
            for leaf in &output.balanced {
                assert!(output
                    .construct
                    .iter()
                    .any(|c| c.is_ancestor_or_equal(leaf)));
            }

            if curve == Curve::Hilbert {
                for (a, b) in output.balanced.iter().tuple_windows() {
                    assert!(a.level().abs_diff(b.level()) <= 1);
                }
            }
        }
    }

    #[test]
    fn test_two_corner_clusters() {
        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let config = TreeSortConfig::new(3, 3)
            .with_grain(1)
            .with_options(SortOptions::BALANCE_OCTREE | SortOptions::REMOVE_DUPLICATES);
        let mut octants = clustered_points();

        let output = tree_sort(&mut octants, &table, &config).unwrap();

        let counts = output.construct.iter().counts_by(|o| o.level());
        assert_eq!(output.construct.len(), 36);
        assert_eq!(counts[&1], 6);
        assert_eq!(counts[&2], 14);
        assert_eq!(counts[&3], 16);
        assert!(is_complete_linear(&output.construct, &table));

        assert!(is_complete_linear(&output.balanced, &table));
        assert!(is_balanced(&output.balanced, &table));
    }

    #[test]
    fn test_empty_input() {
        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let config = TreeSortConfig::new(3, 5).with_options(SortOptions::BALANCE_OCTREE);
        let mut octants = Vec::new();
        let output = tree_sort(&mut octants, &table, &config).unwrap();
        assert!(output.construct.is_empty());
        assert!(output.balanced.is_empty());
    }

    #[test]
    fn test_invalid_input() {
        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let config = TreeSortConfig::new(3, 5);
        let mut octants = vec![Octant::root(3, 6)];
        assert!(tree_sort(&mut octants, &table, &config).is_err());

        let table_2d = RotationTable::new(Curve::Hilbert, 2).unwrap();
        let mut octants = vec![Octant::root(3, 5)];
        assert!(tree_sort(&mut octants, &table_2d, &config).is_err());

        // The table has to belong to the configured curve.
        let morton = TreeSortConfig::new(3, 6).with_curve(Curve::Morton);
        let mut octants = generate_random_octants(20, 3, 6, &mut seeded_rng(2));
        assert!(matches!(
            tree_sort(&mut octants, &table, &morton),
            Err(OctreeError::MalformedRotation(_))
        ));

        // Tables built from raw data carry no curve.
        let raw =
            RotationTable::from_raw(3, vec![[0, 1, 2, 3, 4, 5, 6, 7]], vec![[0; 8]]).unwrap();
        assert_eq!(raw.curve(), None);
        assert!(tree_sort(&mut octants, &raw, &morton).is_ok());
        assert!(RotationTable::new(Curve::Morton, 3)
            .unwrap()
            .is_sorted(&octants));
    }

    #[test]
    fn test_local_optimum() {
        let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
        let mut rng = seeded_rng(7);
        let octants = generate_random_octants(1000, 3, 12, &mut rng);

        let min = octants
            .iter()
            .copied()
            .min_by(|a, b| table.compare(a, b))
            .unwrap();
        let max = octants
            .iter()
            .copied()
            .max_by(|a, b| table.compare(a, b))
            .unwrap();

        let mut work = octants.clone();
        assert_eq!(local_optimum(&mut work, &table, true), Some(min));
        let mut work = octants.clone();
        assert_eq!(local_optimum(&mut work, &table, false), Some(max));

        let single = Octant::new([4, 4, 4], 10, 3, 12).unwrap();
        assert_eq!(local_optimum(&mut [single], &table, false), Some(single));
        assert_eq!(local_optimum(&mut [], &table, true), None);

        // An ancestor is the minimum of its descendants.
        let mut family = single.children();
        family.push(single);
        assert_eq!(local_optimum(&mut family, &table, true), Some(single));
        assert_eq!(
            table.compare(&local_optimum(&mut family, &table, false).unwrap(), &single),
            Ordering::Greater
        );
    }
}
