//! In-place bucketing of octants by the child they fall into.

use crate::{constants::NSIBLINGS, curve::RotationTable, octant::Octant};

/// A contiguous range of octants that share an ancestor at `level`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Curve rotation of the shared ancestor.
    pub rot_id: u8,
    /// Level of the shared ancestor.
    pub level: u8,
    /// First index of the range.
    pub begin: usize,
    /// One past the last index of the range.
    pub end: usize,
}

impl BucketInfo {
    /// Create a new bucket descriptor.
    pub fn new(rot_id: u8, level: u8, begin: usize, end: usize) -> Self {
        debug_assert!(begin <= end);
        Self {
            rot_id,
            level,
            begin,
            end,
        }
    }

    /// The bucket of the root covering `[0, len)`.
    pub fn root(len: usize) -> Self {
        Self::new(0, 0, 0, len)
    }

    /// Number of octants in the bucket.
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Check whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Result of one bucketing step.
///
/// Octants in `[begin, ancestors)` end on or above the bucketing level. The
/// octants of the child at curve position `p` occupy `[children[p], children[p + 1])`.
/// Slots beyond the number of children repeat the end of the range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BucketSplitters {
    /// End of the ancestor range.
    pub ancestors: usize,
    /// Child boundaries in curve order.
    pub children: [usize; NSIBLINGS + 1],
}

impl BucketSplitters {
    /// Index range of the child at curve position `pos`.
    pub fn child_range(&self, pos: usize) -> (usize, usize) {
        (self.children[pos], self.children[pos + 1])
    }
}

/// Permute `items` in place so that bucket `b` occupies `bounds[b]..bounds[b + 1]`.
///
/// `bounds` must be the prefix sums of the bucket sizes, starting at 0 and
/// ending at `items.len()`. Every item is moved at most once by following
/// the permutation cycles with one item in hand. The permutation is not stable.
pub fn partition_in_place<T: Copy, F: Fn(&T) -> usize>(
    items: &mut [T],
    bounds: &[usize],
    bucket_of: F,
) {
    let nbuckets = bounds.len() - 1;
    debug_assert_eq!(bounds[0], 0);
    debug_assert_eq!(bounds[nbuckets], items.len());

    let mut cursor = bounds[..nbuckets].to_vec();

    for bucket in 0..nbuckets {
        while cursor[bucket] < bounds[bucket + 1] {
            let mut hold = items[cursor[bucket]];
            let mut dest = bucket_of(&hold);
            while dest != bucket {
                std::mem::swap(&mut hold, &mut items[cursor[dest]]);
                cursor[dest] += 1;
                dest = bucket_of(&hold);
            }
            items[cursor[bucket]] = hold;
            cursor[bucket] += 1;
        }
    }
}

/// Bucket the octants of `info` by their child at `info.level + 1`.
///
/// The first bucket receives all octants whose level is at most `info.level`,
/// followed by one bucket per child in the order of the curve rotation `info.rot_id`.
pub fn bucket(
    octants: &mut [Octant],
    info: BucketInfo,
    max_depth: u8,
    table: &RotationTable,
) -> BucketSplitters {
    let nchildren = table.num_children();
    let BucketInfo {
        rot_id,
        level,
        begin,
        end,
    } = info;

    if level >= max_depth || begin == end {
        // Nothing to subdivide. Everything stays in the first child.
        let mut children = [end; NSIBLINGS + 1];
        children[0] = begin;
        return BucketSplitters {
            ancestors: begin,
            children,
        };
    }

    let bucket_of = |octant: &Octant| {
        if octant.level() <= level {
            0
        } else {
            1 + table.position_of(rot_id, octant.child_digit(level))
        }
    };

    let range = &mut octants[begin..end];

    let mut counts = [0usize; NSIBLINGS + 1];
    for octant in range.iter() {
        counts[bucket_of(octant)] += 1;
    }

    let mut bounds = [0usize; NSIBLINGS + 2];
    for b in 0..=nchildren {
        bounds[b + 1] = bounds[b] + counts[b];
    }

    partition_in_place(range, &bounds[..nchildren + 2], bucket_of);

    let mut children = [end; NSIBLINGS + 1];
    for (pos, child) in children.iter_mut().take(nchildren + 1).enumerate() {
        *child = begin + bounds[pos + 1];
    }

    BucketSplitters {
        ancestors: begin + bounds[1],
        children,
    }
}
