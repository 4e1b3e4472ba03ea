//! Construct and balance a distributed octree from random cells.

use sfc_octree::{
    communicator::Communicator,
    config::{SortOptions, TreeSortConfig},
    curve::{Curve, RotationTable},
    tools::{
        generate_random_cells, global_size, is_balanced_tree, is_complete_linear_tree, seeded_rng,
    },
    treesort::parallel::par_tree_sort,
};
use tracing_subscriber::EnvFilter;

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let universe = mpi::initialize().unwrap();
    let comm = universe.world();

    let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
    let config = TreeSortConfig::new(3, 10)
        .with_grain(8)
        .with_options(SortOptions::BALANCE_OCTREE | SortOptions::REMOVE_DUPLICATES);

    let mut rng = seeded_rng(comm.rank());
    let cells = generate_random_cells(1000, 3, 10, &mut rng);

    let output = par_tree_sort(cells, &table, &config, &comm).unwrap();

    assert!(is_complete_linear_tree(&output.construct, &table, &comm));
    assert!(is_complete_linear_tree(&output.balanced, &table, &comm));

    // The balance check gathers the whole tree on every rank.
    assert!(is_balanced_tree(&output.balanced, &table, &comm));

    let nconstruct = global_size(&output.construct, &comm);
    let nbalanced = global_size(&output.balanced, &comm);

    if comm.rank() == 0 {
        println!("Constructed tree has {} leaves.", nconstruct);
        println!("Balanced tree has {} leaves.", nbalanced);
    }
}
