//! Move the process boundaries of a balanced octree to reduce boundary faces.

use sfc_octree::{
    communicator::Communicator,
    config::{SortOptions, TreeSortConfig},
    curve::{Curve, RotationTable},
    repartition::dynamic_partition,
    tools::{generate_random_cells, is_complete_linear_tree, seeded_rng},
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
    let config = TreeSortConfig::new(3, 8)
        .with_options(SortOptions::BALANCE_OCTREE | SortOptions::REMOVE_DUPLICATES);

    let mut rng = seeded_rng(comm.rank());
    let cells = generate_random_cells(200, 3, 8, &mut rng);

    let mut tree = par_tree_sort(cells, &table, &config, &comm)
        .unwrap()
        .balanced;

    let outcome = dynamic_partition(&mut tree, &table, config.slack_fraction, &comm).unwrap();

    // Moving boundaries keeps the tree intact.
    assert!(is_complete_linear_tree(&tree, &table, &comm));

    if comm.rank() == 0 {
        println!("Shift: {}", outcome.shift);
        println!(
            "Boundary faces before (min/mean/max): {} / {:.1} / {}",
            outcome.before.min, outcome.before.mean, outcome.before.max
        );
        println!(
            "Boundary faces after (min/mean/max): {} / {:.1} / {}",
            outcome.after.min, outcome.after.mean, outcome.after.max
        );
    }
}
