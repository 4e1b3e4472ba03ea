//! The octant key type.
//!
//! An [Octant] is an axis aligned cell of a regular grid with `2^max_depth`
//! cells per direction. It is described by the integer coordinates of its
//! lower left front corner (the anchor) and its level. A quadrant is the
//! two dimensional analogue and uses the same type with `dim == 2` and `z == 0`.

use itertools::iproduct;
use mpi::traits::Equivalence;

use crate::{
    constants::{DEEPEST_LEVEL, NNEIGHBOURS, NNEIGHBOURS_2D, NSIBLINGS, NSIBLINGS_2D},
    error::{OctreeError, Result},
};

/// An octant (3d) or quadrant (2d) of a linear octree.
///
/// The derived ordering is lexicographic in `(level, x, y, z)`. It is only
/// used for set based deduplication. The space filling curve order is given
/// by [crate::curve::RotationTable::compare].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Equivalence)]
#[repr(C)]
pub struct Octant {
    level: u8,
    x: u32,
    y: u32,
    z: u32,
    dim: u8,
    max_depth: u8,
}

/// Offset of a same level neighbour in units of the octant side length.
type Offset = [i8; 3];

impl Octant {
    /// Create a new octant and check that it is a cell of the grid.
    pub fn new(anchor: [u32; 3], level: u8, dim: u8, max_depth: u8) -> Result<Self> {
        check_grid(dim, max_depth)?;

        let [x, y, z] = anchor;
        let out_of_range = OctreeError::OctantOutOfRange {
            x,
            y,
            z,
            level,
            max_depth,
        };

        if level > max_depth {
            return Err(out_of_range);
        }

        let extent = 1u64 << max_depth;
        if anchor.iter().any(|&c| c as u64 >= extent) || (dim == 2 && z != 0) {
            return Err(out_of_range);
        }

        // The anchor must be aligned to the side length of the octant.
        let side_mask = (1u32 << (max_depth - level)) - 1;
        if anchor.iter().any(|&c| c & side_mask != 0) {
            return Err(out_of_range);
        }

        Ok(Self {
            level,
            x,
            y,
            z,
            dim,
            max_depth,
        })
    }

    /// Create an octant without validation.
    pub(crate) fn from_parts(anchor: [u32; 3], level: u8, dim: u8, max_depth: u8) -> Self {
        debug_assert!(level <= max_depth);
        Self {
            level,
            x: anchor[0],
            y: anchor[1],
            z: anchor[2],
            dim,
            max_depth,
        }
    }

    /// The root octant covering the whole domain.
    pub fn root(dim: u8, max_depth: u8) -> Self {
        Self::from_parts([0, 0, 0], 0, dim, max_depth)
    }

    /// Create the octant at `level` that contains the finest cell with the given anchor.
    pub fn from_cell(cell: [u32; 3], level: u8, dim: u8, max_depth: u8) -> Result<Self> {
        check_grid(dim, max_depth)?;
        let level = level.min(max_depth);
        let shift = max_depth - level;
        let anchor = cell.map(|c| (c >> shift) << shift);
        Self::new(anchor, level, dim, max_depth)
    }

    /// Anchor x coordinate.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Anchor y coordinate.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Anchor z coordinate.
    pub fn z(&self) -> u32 {
        self.z
    }

    /// Anchor coordinates.
    pub fn anchor(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// Level of the octant. The root has level 0.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Spatial dimension.
    pub fn dim(&self) -> u8 {
        self.dim
    }

    /// Depth of the underlying grid.
    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Number of children of each octant of this dimension.
    pub fn num_children(&self) -> usize {
        if self.dim == 2 {
            NSIBLINGS_2D
        } else {
            NSIBLINGS
        }
    }

    /// Return true if this is the root octant.
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    /// Side length in units of the finest grid cells.
    pub fn side_length(&self) -> u32 {
        1 << (self.max_depth - self.level)
    }

    /// Volume in units of the finest grid cells.
    pub fn volume(&self) -> u128 {
        (self.side_length() as u128).pow(self.dim as u32)
    }

    /// Volume of the whole domain in units of the finest grid cells.
    pub fn domain_volume(dim: u8, max_depth: u8) -> u128 {
        Self::root(dim, max_depth).volume()
    }

    /// Check whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor(&self, other: &Octant) -> bool {
        self.level < other.level && self.contains_anchor(other)
    }

    /// Check whether `self` is an ancestor of `other` or equal to it.
    pub fn is_ancestor_or_equal(&self, other: &Octant) -> bool {
        self.level <= other.level && self.contains_anchor(other)
    }

    /// Check whether `self` and `other` share interior volume.
    pub fn overlaps(&self, other: &Octant) -> bool {
        self.is_ancestor_or_equal(other) || other.is_ancestor(self)
    }

    fn contains_anchor(&self, other: &Octant) -> bool {
        let shift = self.max_depth - self.level;
        self.anchor()
            .iter()
            .zip(other.anchor())
            .all(|(&mine, theirs)| (theirs >> shift) << shift == mine)
    }

    /// Return the ancestor at the given level. If `level` is not coarser than
    /// the level of the octant the octant itself is returned.
    pub fn ancestor(&self, level: u8) -> Octant {
        if level >= self.level {
            return *self;
        }
        let shift = self.max_depth - level;
        Self::from_parts(
            self.anchor().map(|c| (c >> shift) << shift),
            level,
            self.dim,
            self.max_depth,
        )
    }

    /// The parent octant. The root is its own parent.
    pub fn parent(&self) -> Octant {
        self.ancestor(self.level.saturating_sub(1))
    }

    /// Morton child digit of the octant's ancestors below `level`.
    ///
    /// Bit 0 is the x bit, bit 1 the y bit and bit 2 the z bit of the anchor
    /// at position `max_depth - level - 1`. Only meaningful if `level < self.level()`.
    pub fn child_digit(&self, level: u8) -> usize {
        debug_assert!(level < self.max_depth);
        let bit = self.max_depth - level - 1;
        (((self.z >> bit) & 1) << 2 | ((self.y >> bit) & 1) << 1 | ((self.x >> bit) & 1)) as usize
    }

    /// Morton index of the octant among its siblings.
    pub fn child_number(&self) -> usize {
        if self.level == 0 {
            0
        } else {
            self.child_digit(self.level - 1)
        }
    }

    /// The child with the given Morton child number.
    pub fn child(&self, cnum: usize) -> Octant {
        debug_assert!(self.level < self.max_depth);
        debug_assert!(cnum < self.num_children());
        let half = self.side_length() >> 1;
        let offset = |bit: usize| if cnum & (1 << bit) != 0 { half } else { 0 };
        Self::from_parts(
            [self.x + offset(0), self.y + offset(1), self.z + offset(2)],
            self.level + 1,
            self.dim,
            self.max_depth,
        )
    }

    /// All children in Morton order.
    pub fn children(&self) -> Vec<Octant> {
        (0..self.num_children())
            .map(|cnum| self.child(cnum))
            .collect()
    }

    /// The same level neighbour at the given offset, or `None` if it lies outside the domain.
    pub fn neighbour(&self, offset: Offset) -> Option<Octant> {
        if self.dim == 2 && offset[2] != 0 {
            return None;
        }
        let side = self.side_length() as i64;
        let extent = 1i64 << self.max_depth;
        let mut anchor = [0u32; 3];
        for (new, (&coord, &step)) in anchor.iter_mut().zip(self.anchor().iter().zip(&offset)) {
            let moved = coord as i64 + step as i64 * side;
            if moved < 0 || moved >= extent {
                return None;
            }
            *new = moved as u32;
        }
        Some(Self::from_parts(
            anchor,
            self.level,
            self.dim,
            self.max_depth,
        ))
    }

    /// Neighbour in negative x direction.
    pub fn left(&self) -> Option<Octant> {
        self.neighbour([-1, 0, 0])
    }

    /// Neighbour in positive x direction.
    pub fn right(&self) -> Option<Octant> {
        self.neighbour([1, 0, 0])
    }

    /// Neighbour in negative y direction.
    pub fn front(&self) -> Option<Octant> {
        self.neighbour([0, -1, 0])
    }

    /// Neighbour in positive y direction.
    pub fn back(&self) -> Option<Octant> {
        self.neighbour([0, 1, 0])
    }

    /// Neighbour in negative z direction. Always `None` in 2d.
    pub fn bottom(&self) -> Option<Octant> {
        self.neighbour([0, 0, -1])
    }

    /// Neighbour in positive z direction. Always `None` in 2d.
    pub fn top(&self) -> Option<Octant> {
        self.neighbour([0, 0, 1])
    }

    /// The face neighbours that lie inside the domain.
    pub fn face_neighbours(&self) -> Vec<Octant> {
        [
            self.top(),
            self.bottom(),
            self.right(),
            self.left(),
            self.front(),
            self.back(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// All same level neighbours (faces, edges and corners) inside the domain.
    pub fn neighbours(&self) -> Vec<Octant> {
        let zrange = if self.dim == 2 { 0..=0 } else { -1..=1 };
        let mut result = Vec::with_capacity(if self.dim == 2 {
            NNEIGHBOURS_2D
        } else {
            NNEIGHBOURS
        });
        for (dz, dy, dx) in iproduct!(zrange, -1i8..=1, -1i8..=1) {
            if dx == 0 && dy == 0 && dz == 0 {
                continue;
            }
            if let Some(neighbour) = self.neighbour([dx, dy, dz]) {
                result.push(neighbour);
            }
        }
        result
    }

    /// Check whether the closed boxes of two non-overlapping octants touch.
    ///
    /// Octants touch if they share a face, an edge or a corner.
    pub fn touches(&self, other: &Octant) -> bool {
        if self.overlaps(other) {
            return false;
        }
        let (a, b) = (self.side_length() as u64, other.side_length() as u64);
        self.anchor()
            .iter()
            .zip(other.anchor())
            .take(self.dim as usize)
            .all(|(&p, q)| {
                let (p, q) = (p as u64, q as u64);
                p <= q + b && q <= p + a
            })
    }

    /// Check whether two non-overlapping octants share (part of) a face.
    pub fn shares_face(&self, other: &Octant) -> bool {
        if !self.touches(other) {
            return false;
        }
        let (a, b) = (self.side_length() as u64, other.side_length() as u64);
        // Exactly one direction may be a contact direction. In all others the
        // projections must overlap with positive length.
        self.anchor()
            .iter()
            .zip(other.anchor())
            .take(self.dim as usize)
            .filter(|&(&p, q)| {
                let (p, q) = (p as u64, q as u64);
                p == q + b || q == p + a
            })
            .count()
            == 1
    }

    /// Check that the octant lives on the given grid.
    pub fn check_parameters(&self, dim: u8, max_depth: u8) -> Result<()> {
        if self.dim != dim || self.max_depth != max_depth {
            return Err(OctreeError::ParameterMismatch {
                found_dim: self.dim,
                found_depth: self.max_depth,
                dim,
                depth: max_depth,
            });
        }
        Self::new(self.anchor(), self.level, dim, max_depth).map(|_| ())
    }
}

/// Check that dimension and depth describe a supported grid.
pub fn check_grid(dim: u8, max_depth: u8) -> Result<()> {
    if dim != 2 && dim != 3 {
        return Err(OctreeError::InvalidDimension(dim));
    }
    if max_depth > DEEPEST_LEVEL || max_depth == 0 {
        return Err(OctreeError::InvalidMaxDepth {
            depth: max_depth,
            limit: DEEPEST_LEVEL,
        });
    }
    Ok(())
}

impl std::fmt::Display for Octant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Octant: anchor ({}, {}, {}), level {}",
            self.x, self.y, self.z, self.level
        )
    }
}

#[cfg(test)]
mod test {
    use super::Octant;

    #[test]
    fn test_new_rejects_invalid_octants() {
        assert!(Octant::new([0, 0, 0], 0, 3, 4).is_ok());
        assert!(Octant::new([0, 0, 0], 0, 4, 4).is_err());
        assert!(Octant::new([0, 0, 0], 5, 3, 4).is_err());
        assert!(Octant::new([16, 0, 0], 4, 3, 4).is_err());
        assert!(Octant::new([0, 0, 1], 4, 2, 4).is_err());
        // Anchor not aligned to the level.
        assert!(Octant::new([1, 0, 0], 2, 3, 4).is_err());
        assert!(Octant::new([0, 0, 0], 0, 3, 31).is_err());
    }

    #[test]
    fn test_ancestor_relations() {
        let root = Octant::root(3, 4);
        let leaf = Octant::new([5, 9, 3], 4, 3, 4).unwrap();

        assert!(root.is_ancestor(&leaf));
        assert!(!leaf.is_ancestor(&leaf));
        assert!(leaf.is_ancestor_or_equal(&leaf));
        assert!(!leaf.is_ancestor(&root));

        let mut current = leaf;
        while current.level() > 0 {
            let parent = current.parent();
            assert!(parent.is_ancestor(&leaf));
            assert_eq!(parent.child(current.child_number()), current);
            current = parent;
        }
        assert_eq!(current, root);
        assert_eq!(leaf.ancestor(1).anchor(), [0, 8, 0]);
    }

    #[test]
    fn test_children_volume() {
        let octant = Octant::new([4, 4, 0], 2, 3, 4).unwrap();
        let children = octant.children();
        assert_eq!(children.len(), 8);
        assert_eq!(
            children.iter().map(|c| c.volume()).sum::<u128>(),
            octant.volume()
        );
        for child in &children {
            assert_eq!(child.parent(), octant);
        }

        let quadrant = Octant::new([4, 4, 0], 2, 2, 4).unwrap();
        assert_eq!(quadrant.children().len(), 4);
        assert_eq!(quadrant.volume(), 16);
        assert_eq!(Octant::domain_volume(3, 30), 1u128 << 90);
    }

    #[test]
    fn test_neighbours_at_the_boundary() {
        let corner = Octant::new([0, 0, 0], 4, 3, 4).unwrap();
        assert!(corner.left().is_none());
        assert!(corner.front().is_none());
        assert!(corner.bottom().is_none());
        assert_eq!(corner.face_neighbours().len(), 3);
        assert_eq!(corner.neighbours().len(), 7);

        let inner = Octant::new([4, 4, 4], 4, 3, 4).unwrap();
        assert_eq!(inner.face_neighbours().len(), 6);
        assert_eq!(inner.neighbours().len(), 26);

        let quadrant = Octant::new([4, 4, 0], 4, 2, 4).unwrap();
        assert_eq!(quadrant.face_neighbours().len(), 4);
        assert_eq!(quadrant.neighbours().len(), 8);
        assert!(quadrant.top().is_none());

        assert!(Octant::root(3, 4).neighbours().is_empty());
    }

    #[test]
    fn test_touching() {
        let a = Octant::new([0, 0, 0], 1, 3, 4).unwrap();
        let b = Octant::new([8, 0, 0], 2, 3, 4).unwrap();
        let c = Octant::new([12, 0, 0], 2, 3, 4).unwrap();
        let d = Octant::new([8, 8, 8], 1, 3, 4).unwrap();

        assert!(a.touches(&b));
        assert!(a.shares_face(&b));
        assert!(!a.touches(&c));
        // Corner contact.
        assert!(a.touches(&d));
        assert!(!a.shares_face(&d));
        // Overlapping octants do not touch.
        assert!(!a.touches(&a.child(3)));
    }
}
