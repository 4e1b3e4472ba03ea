//! Build an adaptive octree from clustered points.

use rand::prelude::*;
use rand_distr::Normal;
use sfc_octree::{
    communicator::Communicator,
    config::{SortOptions, TreeSortConfig},
    curve::{Curve, RotationTable},
    geometry::{compute_global_bounding_box, points_to_octants},
    tools::{global_size, is_complete_linear_tree, seeded_rng},
    treesort::parallel::par_tree_sort,
};
use tracing_subscriber::EnvFilter;

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let universe = mpi::initialize().unwrap();
    let comm = universe.world();

    // Points are clustered around the origin.
    let mut rng = seeded_rng(comm.rank());
    let normal = Normal::new(0.0, 1.0).unwrap();
    let npoints = 5000;
    let points = (0..npoints)
        .map(|_| {
            [
                normal.sample(&mut rng),
                normal.sample(&mut rng),
                normal.sample(&mut rng),
            ]
        })
        .collect::<Vec<_>>();

    let bounding_box = compute_global_bounding_box(&points, &comm);
    if comm.rank() == 0 {
        println!("Bounding box: {}", bounding_box);
    }

    let max_depth = 16;
    let cells = points_to_octants(&points, &bounding_box, 3, max_depth).unwrap();

    let table = RotationTable::new(Curve::Morton, 3).unwrap();
    let config = TreeSortConfig::new(3, max_depth)
        .with_curve(Curve::Morton)
        .with_grain(50)
        .with_options(SortOptions::CONSTRUCT_OCTREE);

    let output = par_tree_sort(cells, &table, &config, &comm).unwrap();
    assert!(is_complete_linear_tree(&output.construct, &table, &comm));

    let nleaves = global_size(&output.construct, &comm);
    if comm.rank() == 0 {
        println!("Octree with {} leaves for {} points.", nleaves, npoints * comm.size());
    }
}
