//! Sort random octants across MPI ranks and remove duplicates.

use sfc_octree::{
    communicator::Communicator,
    config::{SortOptions, TreeSortConfig},
    curve::{Curve, RotationTable},
    tools::{generate_random_octants, global_size, is_linear_tree, seeded_rng},
    treesort::parallel::par_tree_sort,
};
use tracing_subscriber::EnvFilter;

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();

    let table = RotationTable::new(Curve::Hilbert, 3).unwrap();
    let config = TreeSortConfig::new(3, 16).with_options(SortOptions::REMOVE_DUPLICATES);

    // Every rank creates its own random octants.
    let mut rng = seeded_rng(comm.rank());
    let octants = generate_random_octants(10000, 3, 16, &mut rng);

    let output = par_tree_sort(octants, &table, &config, &comm).unwrap();

    assert!(is_linear_tree(&output.sorted, &table, &comm));

    let nsorted = global_size(&output.sorted, &comm);
    if comm.rank() == 0 {
        println!("Sorted {} unique octants on {} ranks.", nsorted, comm.size());
    }
}
