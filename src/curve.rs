//! Space filling curve rotation tables.
//!
//! A space filling curve is described by a finite automaton. Each state (a
//! rotation) fixes the order in which the children of an octant are visited
//! and the state that is used inside each child. The Morton curve has a
//! single state. The Hilbert curve tables are generated from the compact
//! Hilbert index transform of Hamilton: a state is a pair `(e, d)` of entry
//! corner and intra sub-cube direction, and the child at curve position `w`
//! has state `(e ^ rotl(entry(w), d + 1), d + dir(w) + 1)`.

use std::{cmp::Ordering, collections::HashMap};

use crate::{
    constants::NSIBLINGS,
    error::{OctreeError, Result},
    octant::Octant,
};

/// The supported space filling curves.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Curve {
    /// Z-order curve.
    Morton,
    /// Hilbert curve.
    #[default]
    Hilbert,
}

/// Rotation automaton of a space filling curve.
///
/// For a rotation `r` and a Morton child number `c` (bit 0: x, bit 1: y, bit 2: z)
/// the table stores the position of the child along the curve and the rotation
/// used inside the child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationTable {
    dim: u8,
    curve: Option<Curve>,
    order: Vec<[u8; NSIBLINGS]>,
    position: Vec<[u8; NSIBLINGS]>,
    child_rotation: Vec<[u8; NSIBLINGS]>,
}

impl RotationTable {
    /// Build the rotation table of a curve.
    pub fn new(curve: Curve, dim: u8) -> Result<Self> {
        if dim != 2 && dim != 3 {
            return Err(OctreeError::InvalidDimension(dim));
        }
        Ok(match curve {
            Curve::Morton => Self::morton(dim),
            Curve::Hilbert => Self::hilbert(dim),
        })
    }

    /// Build a table from raw data.
    ///
    /// `order[r][p]` is the Morton child number visited at curve position `p`
    /// in rotation `r` and `child_rotation[r][c]` the rotation of child `c`.
    /// Entries beyond the number of children of the dimension are ignored.
    pub fn from_raw(
        dim: u8,
        order: Vec<[u8; NSIBLINGS]>,
        child_rotation: Vec<[u8; NSIBLINGS]>,
    ) -> Result<Self> {
        if dim != 2 && dim != 3 {
            return Err(OctreeError::InvalidDimension(dim));
        }
        let nchildren = 1usize << dim;
        let nrot = order.len();

        if nrot == 0 || nrot > u8::MAX as usize {
            return Err(OctreeError::MalformedRotation(format!(
                "table must have between 1 and 255 rotations, got {}",
                nrot
            )));
        }
        if child_rotation.len() != nrot {
            return Err(OctreeError::MalformedRotation(format!(
                "{} child rotation rows for {} rotations",
                child_rotation.len(),
                nrot
            )));
        }

        let mut position = vec![[0u8; NSIBLINGS]; nrot];
        for (rot, (row, inverse)) in order.iter().zip(position.iter_mut()).enumerate() {
            let mut seen = [false; NSIBLINGS];
            for (pos, &cnum) in row.iter().take(nchildren).enumerate() {
                if cnum as usize >= nchildren || seen[cnum as usize] {
                    return Err(OctreeError::MalformedRotation(format!(
                        "rotation {} does not visit each child exactly once",
                        rot
                    )));
                }
                seen[cnum as usize] = true;
                inverse[cnum as usize] = pos as u8;
            }
        }

        for (rot, row) in child_rotation.iter().enumerate() {
            if row.iter().take(nchildren).any(|&next| next as usize >= nrot) {
                return Err(OctreeError::MalformedRotation(format!(
                    "rotation {} refers to an unknown rotation",
                    rot
                )));
            }
        }

        Ok(Self {
            dim,
            curve: None,
            order,
            position,
            child_rotation,
        })
    }

    fn morton(dim: u8) -> Self {
        let mut order = [0u8; NSIBLINGS];
        for (pos, elem) in order.iter_mut().enumerate() {
            *elem = pos as u8;
        }
        Self {
            dim,
            curve: Some(Curve::Morton),
            order: vec![order],
            position: vec![order],
            child_rotation: vec![[0; NSIBLINGS]],
        }
    }

    fn hilbert(dim: u8) -> Self {
        let n = dim as u32;
        let nchildren = 1usize << dim;

        let mut ids = HashMap::<(u32, u32), u8>::new();
        let mut states = vec![(0u32, 0u32)];
        ids.insert((0, 0), 0);

        let mut order = Vec::new();
        let mut position = Vec::new();
        let mut child_rotation = Vec::new();

        // Breadth first enumeration of all states reachable from the initial one.
        let mut current = 0;
        while current < states.len() {
            let (e, d) = states[current];
            let mut order_row = [0u8; NSIBLINGS];
            let mut position_row = [0u8; NSIBLINGS];
            let mut rotation_row = [0u8; NSIBLINGS];

            for cnum in 0..nchildren as u32 {
                let w = gray_code_inverse(rotate_right(cnum ^ e, d + 1, n));
                let next = (
                    e ^ rotate_left(entry_point(w), d + 1, n),
                    (d + direction(w, n) + 1) % n,
                );
                let next_id = *ids.entry(next).or_insert_with(|| {
                    states.push(next);
                    (states.len() - 1) as u8
                });

                order_row[w as usize] = cnum as u8;
                position_row[cnum as usize] = w as u8;
                rotation_row[cnum as usize] = next_id;
            }

            order.push(order_row);
            position.push(position_row);
            child_rotation.push(rotation_row);
            current += 1;
        }

        Self {
            dim,
            curve: Some(Curve::Hilbert),
            order,
            position,
            child_rotation,
        }
    }

    /// The curve the table was generated for. Tables built from raw data
    /// have no known curve.
    pub fn curve(&self) -> Option<Curve> {
        self.curve
    }

    /// Spatial dimension of the curve.
    pub fn dim(&self) -> u8 {
        self.dim
    }

    /// Number of children per octant.
    pub fn num_children(&self) -> usize {
        1 << self.dim
    }

    /// Number of rotations (states) of the automaton.
    pub fn num_rotations(&self) -> usize {
        self.order.len()
    }

    /// Check that `rot_id` is a state of the automaton.
    pub fn check_rotation(&self, rot_id: u8) -> Result<()> {
        if rot_id as usize >= self.num_rotations() {
            return Err(OctreeError::MalformedRotation(format!(
                "rotation id {} out of range, the table has {} rotations",
                rot_id,
                self.num_rotations()
            )));
        }
        Ok(())
    }

    /// Morton child number visited at curve position `pos`.
    pub fn child_at(&self, rot_id: u8, pos: usize) -> usize {
        self.order[rot_id as usize][pos] as usize
    }

    /// Curve position of the Morton child `cnum`.
    pub fn position_of(&self, rot_id: u8, cnum: usize) -> usize {
        self.position[rot_id as usize][cnum] as usize
    }

    /// Rotation used inside the Morton child `cnum`.
    pub fn child_rotation(&self, rot_id: u8, cnum: usize) -> u8 {
        self.child_rotation[rot_id as usize][cnum]
    }

    /// Compare two octants along the curve starting in rotation `rot_id`.
    ///
    /// The curve is descended level by level. On each level an octant that
    /// ends on or above the level sorts before all octants that continue into
    /// one of the children, so ancestors sort before their descendants.
    pub fn compare_from(&self, rot_id: u8, a: &Octant, b: &Octant) -> Ordering {
        debug_assert_eq!(a.max_depth(), b.max_depth());
        let mut rot = rot_id;
        for level in 0..a.max_depth() {
            let key = |o: &Octant| {
                if o.level() <= level {
                    0
                } else {
                    1 + self.position_of(rot, o.child_digit(level))
                }
            };
            let (key_a, key_b) = (key(a), key(b));
            match key_a.cmp(&key_b) {
                Ordering::Equal if key_a == 0 => return Ordering::Equal,
                Ordering::Equal => rot = self.child_rotation(rot, a.child_digit(level)),
                other => return other,
            }
        }
        a.level().cmp(&b.level())
    }

    /// Compare two octants along the curve.
    pub fn compare(&self, a: &Octant, b: &Octant) -> Ordering {
        self.compare_from(0, a, b)
    }

    /// Check whether a slice is sorted along the curve.
    pub fn is_sorted(&self, octants: &[Octant]) -> bool {
        octants
            .windows(2)
            .all(|pair| self.compare(&pair[0], &pair[1]) != Ordering::Greater)
    }
}

fn rotate_right(value: u32, shift: u32, bits: u32) -> u32 {
    let mask = (1 << bits) - 1;
    let shift = shift % bits;
    ((value >> shift) | (value << (bits - shift))) & mask
}

fn rotate_left(value: u32, shift: u32, bits: u32) -> u32 {
    let mask = (1 << bits) - 1;
    let shift = shift % bits;
    ((value << shift) | (value >> (bits - shift))) & mask
}

fn gray_code(value: u32) -> u32 {
    value ^ (value >> 1)
}

fn gray_code_inverse(value: u32) -> u32 {
    let mut result = value;
    let mut shift = value >> 1;
    while shift != 0 {
        result ^= shift;
        shift >>= 1;
    }
    result
}

/// Entry corner of the sub-cube at curve position `w`.
fn entry_point(w: u32) -> u32 {
    if w == 0 {
        0
    } else {
        gray_code(2 * ((w - 1) / 2))
    }
}

/// Intra sub-cube direction at curve position `w`.
fn direction(w: u32, bits: u32) -> u32 {
    if w == 0 {
        0
    } else if w % 2 == 0 {
        (w - 1).trailing_ones() % bits
    } else {
        w.trailing_ones() % bits
    }
}
