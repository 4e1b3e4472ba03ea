//! Quantisation of physical points to octants of the deepest level.

use crate::{
    communicator::Communicator,
    error::Result,
    octant::{check_grid, Octant},
};

/// A bounding box describes the physical domain that is mapped onto the grid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhysicalBox {
    coords: [f64; 6],
}

impl PhysicalBox {
    /// Create a new bounding box.
    ///
    /// The coordinates are given by `[xmin, ymin, zmin, xmax, ymax, zmax]`.
    pub fn new(coords: [f64; 6]) -> Self {
        Self { coords }
    }

    /// Compute the bounding box of a set of points.
    ///
    /// The box is slightly enlarged so that no point lies on its upper faces.
    pub fn from_points(points: &[[f64; 3]]) -> PhysicalBox {
        let mut coords = [f64::MAX, f64::MAX, f64::MAX, f64::MIN, f64::MIN, f64::MIN];
        for point in points {
            for axis in 0..3 {
                coords[axis] = f64::min(coords[axis], point[axis]);
                coords[3 + axis] = f64::max(coords[3 + axis], point[axis]);
            }
        }
        Self::enlarged(coords)
    }

    fn enlarged(mut coords: [f64; 6]) -> Self {
        for axis in 0..3 {
            let scale = f64::max(1.0, f64::max(coords[axis].abs(), coords[3 + axis].abs()));
            coords[axis] -= scale * f64::EPSILON;
            coords[3 + axis] += scale * f64::EPSILON;
        }
        Self { coords }
    }

    /// Return coordinates
    pub fn coordinates(&self) -> [f64; 6] {
        self.coords
    }

    /// Map a point from the reference box [0, 1]^3 to the bounding box.
    pub fn reference_to_physical(&self, point: [f64; 3]) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        [
            xmin + (xmax - xmin) * point[0],
            ymin + (ymax - ymin) * point[1],
            zmin + (zmax - zmin) * point[2],
        ]
    }

    /// Map a point from the physical domain to the reference box.
    pub fn physical_to_reference(&self, point: [f64; 3]) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        [
            (point[0] - xmin) / (xmax - xmin),
            (point[1] - ymin) / (ymax - ymin),
            (point[2] - zmin) / (zmax - zmin),
        ]
    }
}

impl std::fmt::Display for PhysicalBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        write!(
            f,
            "(xmin: {}, ymin: {}, zmin: {}, xmax: {}, ymax: {}, zmax: {})",
            xmin, ymin, zmin, xmax, ymax, zmax
        )
    }
}

/// Compute the bounding box of the points of all processes.
pub fn compute_global_bounding_box<C: Communicator>(points: &[[f64; 3]], comm: &C) -> PhysicalBox {
    let mut local = [f64::MAX, f64::MAX, f64::MAX, f64::MIN, f64::MIN, f64::MIN];
    for point in points {
        for axis in 0..3 {
            local[axis] = f64::min(local[axis], point[axis]);
            local[3 + axis] = f64::max(local[3 + axis], point[axis]);
        }
    }

    // Processes without points contribute an inverted box.
    let gathered = comm.all_gather(&local);
    let mut coords = [f64::MAX, f64::MAX, f64::MAX, f64::MIN, f64::MIN, f64::MIN];
    for other in gathered.chunks(6) {
        for axis in 0..3 {
            coords[axis] = f64::min(coords[axis], other[axis]);
            coords[3 + axis] = f64::max(coords[3 + axis], other[3 + axis]);
        }
    }

    PhysicalBox::enlarged(coords)
}

/// Map points to the cells of the deepest level that contain them.
///
/// In two dimensions the z coordinate is ignored. Points outside the box are
/// clamped to the nearest cell.
pub fn points_to_octants(
    points: &[[f64; 3]],
    bounding_box: &PhysicalBox,
    dim: u8,
    max_depth: u8,
) -> Result<Vec<Octant>> {
    check_grid(dim, max_depth)?;

    let ncells = (1u64 << max_depth) as f64;
    let last = (1u32 << max_depth) - 1;
    let quantise = |value: f64| (value * ncells).floor().clamp(0.0, last as f64) as u32;

    Ok(points
        .iter()
        .map(|&point| {
            let reference = bounding_box.physical_to_reference(point);
            let z = if dim == 2 { 0 } else { quantise(reference[2]) };
            Octant::from_parts(
                [quantise(reference[0]), quantise(reference[1]), z],
                max_depth,
                dim,
                max_depth,
            )
        })
        .collect())
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::{compute_global_bounding_box, points_to_octants, PhysicalBox};
    use crate::{
        communicator::{local::run_local, Communicator},
        tools::seeded_rng,
    };

    fn random_points(npoints: usize, seed: usize) -> Vec<[f64; 3]> {
        let mut rng = seeded_rng(seed);
        (0..npoints)
            .map(|_| {
                [
                    rng.gen_range(-1.0..2.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(-5.0..-3.0),
                ]
            })
            .collect()
    }

    #[test]
    fn test_reference_maps() {
        let bounding_box = PhysicalBox::new([0.0, -1.0, 2.0, 2.0, 1.0, 6.0]);
        let point = [0.5, 0.0, 3.0];
        let reference = bounding_box.physical_to_reference(point);
        assert_eq!(reference, [0.25, 0.5, 0.25]);
        assert_eq!(bounding_box.reference_to_physical(reference), point);
    }

    #[test]
    fn test_global_bounding_box() {
        let results = run_local(3, |comm| {
            // Rank 2 holds no points.
            let points = if comm.rank() == 2 {
                Vec::new()
            } else {
                random_points(50, comm.rank())
            };
            let bounding_box = compute_global_bounding_box(&points, &comm);
            (points, bounding_box)
        });

        let all_points = results
            .iter()
            .flat_map(|(points, _)| points.iter().copied())
            .collect::<Vec<_>>();
        let expected = PhysicalBox::from_points(&all_points);
        for (_, bounding_box) in results {
            assert_eq!(bounding_box, expected);
        }
    }

    #[test]
    fn test_points_to_octants() {
        let points = random_points(200, 7);
        let bounding_box = PhysicalBox::from_points(&points);

        let octants = points_to_octants(&points, &bounding_box, 3, 10).unwrap();
        assert_eq!(octants.len(), points.len());
        for (octant, point) in octants.iter().zip(&points) {
            assert_eq!(octant.level(), 10);
            let reference = bounding_box.physical_to_reference(*point);
            let anchor = octant.anchor();
            for axis in 0..3 {
                let lower = anchor[axis] as f64 / 1024.0;
                let upper = (anchor[axis] + 1) as f64 / 1024.0;
                assert!(lower <= reference[axis] && reference[axis] < upper);
            }
        }

        let flat = points_to_octants(&points, &bounding_box, 2, 10).unwrap();
        assert!(flat.iter().all(|o| o.z() == 0 && o.dim() == 2));

        // Points outside the box end up in boundary cells.
        let outside = points_to_octants(&[[10.0, -10.0, 0.0]], &bounding_box, 3, 4).unwrap();
        assert_eq!(outside[0].x(), 15);
        assert_eq!(outside[0].y(), 0);

        assert!(points_to_octants(&points, &bounding_box, 4, 10).is_err());
    }
}
