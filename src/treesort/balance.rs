//! Generation of the octants that enforce the 2:1 balance condition.

use std::collections::BTreeSet;

use crate::octant::Octant;

/// Close a set of octants under the balance condition.
///
/// For every octant of the set the same level neighbours of its parent are
/// added. Newly added octants are processed in turn, so the refinement
/// ripples outwards and towards coarser levels. The complete linear tree
/// that refines every octant of the returned set is 2:1 balanced (including
/// edge and corner neighbours).
///
/// The result is ordered by `(level, x, y, z)`.
pub fn balance_closure(octants: &[Octant]) -> Vec<Octant> {
    let mut closure = octants.iter().copied().collect::<BTreeSet<_>>();
    let mut visited_parents = BTreeSet::<Octant>::new();

    // The work list grows while it is processed.
    let mut work_list = closure.iter().copied().collect::<Vec<_>>();
    let mut index = 0;

    while index < work_list.len() {
        let octant = work_list[index];
        index += 1;

        // The parent of a level 1 octant is the root, which has no neighbours.
        if octant.level() < 2 {
            continue;
        }

        let parent = octant.parent();
        if !visited_parents.insert(parent) {
            continue;
        }

        for neighbour in parent.neighbours() {
            if closure.insert(neighbour) {
                work_list.push(neighbour);
            }
        }
    }

    closure.into_iter().collect()
}

#[cfg(test)]
mod test {
    use super::balance_closure;
    use crate::octant::Octant;

    #[test]
    fn test_closure_contains_parent_neighbours() {
        let deep = Octant::new([8, 8, 8], 4, 3, 4).unwrap();
        let closure = balance_closure(&[deep]);

        assert!(closure.contains(&deep));
        for neighbour in deep.parent().neighbours() {
            assert!(closure.contains(&neighbour));
        }

        // The ripple reaches level 1 but never the root.
        assert!(closure.iter().any(|o| o.level() == 1));
        assert!(closure.iter().all(|o| o.level() >= 1));

        // Sorted by level first and free of duplicates.
        for pair in closure.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].level() <= pair[1].level());
        }
    }

    #[test]
    fn test_closure_of_coarse_octants_is_trivial() {
        let root = Octant::root(2, 5);
        let mut children = root.children();
        let closure = balance_closure(&children);
        children.sort();
        assert_eq!(closure, children);
        assert!(balance_closure(&[]).is_empty());
    }
}
