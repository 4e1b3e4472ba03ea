//! Distributed tree sort.
//!
//! The octants are moved to their final process with splitters from
//! [select_splitters], sorted locally and merged across process boundaries.
//! Constructed and balanced trees are built locally on every process and
//! merged by a second distributed sort that removes duplicates and keeps the
//! finer of overlapping octants.

use crate::{
    communicator::Communicator,
    config::{SortOptions, TreeSortConfig},
    curve::RotationTable,
    error::{OctreeError, Result},
    octant::Octant,
    tools::{global_inclusive_cumsum, sort_to_bins},
    treesort::{
        check_input, sort_local,
        splitters::{select_splitters, SplitterSelection},
        TreeSortOutput,
    },
};

/// Result of [par_tree_sort] on one process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParTreeSortOutput {
    /// The local part of the globally sorted array.
    pub sorted: Vec<Octant>,
    /// The local part of the complete linear octree.
    pub construct: Vec<Octant>,
    /// The local part of the complete 2:1 balanced linear octree.
    pub balanced: Vec<Octant>,
    /// Splitters this process saw fixed outside the load tolerance.
    pub fallbacks: usize,
}

/// Sort a distributed array of octants along the curve.
///
/// Every process passes its local octants and receives its part of the
/// globally sorted array: the concatenation of the results in rank order is
/// sorted. With [SortOptions::CONSTRUCT_OCTREE] or [SortOptions::BALANCE_OCTREE]
/// the distributed complete (and balanced) octrees are returned as well.
///
/// The input is validated on every process before any data moves. If a
/// process finds an invalid octant or parameter all processes return an
/// error: the detecting process its own error, the others
/// [OctreeError::RemoteFailure].
pub fn par_tree_sort<C: Communicator>(
    octants: Vec<Octant>,
    table: &RotationTable,
    config: &TreeSortConfig,
    comm: &C,
) -> Result<ParTreeSortOutput> {
    let _span =
        tracing::info_span!("par_tree_sort", rank = comm.rank(), size = comm.size()).entered();

    check_input_everywhere(&octants, table, config, comm)?;

    let (sorted, trees, mut fallbacks) = sort_distributed(octants, table, config, comm)?;

    let merge_config = config
        .clone()
        .with_options(SortOptions::REMOVE_DUPLICATES);
    let mut merge = |tree: Vec<Octant>| -> Result<Vec<Octant>> {
        let tree = block_partition(tree, comm);
        let (merged, _, merge_fallbacks) = sort_distributed(tree, table, &merge_config, comm)?;
        fallbacks += merge_fallbacks;
        Ok(merged)
    };

    let construct = if config.options.construct() {
        merge(trees.construct)?
    } else {
        Vec::new()
    };

    let balanced = if config.options.balance() {
        merge(trees.balanced)?
    } else {
        Vec::new()
    };

    tracing::info!(
        sorted = sorted.len(),
        construct = construct.len(),
        balanced = balanced.len(),
        fallbacks,
        "distributed tree sort finished"
    );

    Ok(ParTreeSortOutput {
        sorted,
        construct,
        balanced,
        fallbacks,
    })
}

/// Sort and repartition a distributed array without duplicate removal or
/// tree construction.
pub fn partition_w<C: Communicator>(
    octants: Vec<Octant>,
    table: &RotationTable,
    config: &TreeSortConfig,
    comm: &C,
) -> Result<Vec<Octant>> {
    let config = config.clone().with_grain(1).with_options(SortOptions::NONE);
    Ok(par_tree_sort(octants, table, &config, comm)?.sorted)
}

/// Validate the input locally and agree on the outcome.
fn check_input_everywhere<C: Communicator>(
    octants: &[Octant],
    table: &RotationTable,
    config: &TreeSortConfig,
    comm: &C,
) -> Result<()> {
    let local = check_input(octants, table, config);
    if comm.all_reduce_and(local.is_ok()) {
        Ok(())
    } else {
        Err(local.err().unwrap_or(OctreeError::RemoteFailure))
    }
}

/// Redistribute, sort locally and merge the process boundaries.
fn sort_distributed<C: Communicator>(
    octants: Vec<Octant>,
    table: &RotationTable,
    config: &TreeSortConfig,
    comm: &C,
) -> Result<(Vec<Octant>, TreeSortOutput, usize)> {
    let (mut sorted, fallbacks) = distribute(octants, table, config, comm)?;

    let trees = sort_local(&mut sorted, table, config);

    if config.options.remove_duplicates() {
        remove_boundary_duplicates(&mut sorted, comm)?;
    }

    Ok((sorted, trees, fallbacks))
}

/// Move every octant to the process that owns its part of the curve.
///
/// With more processes than `config.sf_k` the processes are arranged in
/// `sf_k` groups of consecutive ranks. The octants are first split between
/// the groups, exchanged between the members with the same position in their
/// group, and the search continues inside each group. Group counts that do
/// not divide the number of processes end the staging and the remaining
/// processes are searched at once.
fn distribute<C: Communicator>(
    mut octants: Vec<Octant>,
    table: &RotationTable,
    config: &TreeSortConfig,
    comm: &C,
) -> Result<(Vec<Octant>, usize)> {
    let mut fallbacks = 0;
    let mut stage_comm: Option<C> = None;

    loop {
        let current = stage_comm.as_ref().unwrap_or(comm);
        let size = current.size();
        if size <= config.sf_k || size % config.sf_k != 0 {
            break;
        }

        let groups = config.sf_k;
        let group_size = size / groups;
        tracing::debug!(size, groups, "staged splitter search");

        let selection = select_splitters(
            &mut octants,
            table,
            config.max_depth,
            config.load_flexibility,
            groups,
            current,
        );
        fallbacks += selection.fallbacks;

        // Members with the same position in their group. Their rank in the
        // column is the index of their group.
        let column = current.split(current.rank() % group_size)?;
        octants = redistribute_by_splitters(&octants, &selection, &column);

        let group = current.split(current.rank() / group_size)?;
        stage_comm = Some(group);
    }

    let current = stage_comm.as_ref().unwrap_or(comm);
    let selection = select_splitters(
        &mut octants,
        table,
        config.max_depth,
        config.load_flexibility,
        current.size(),
        current,
    );
    fallbacks += selection.fallbacks;

    Ok((
        redistribute_by_splitters(&octants, &selection, current),
        fallbacks,
    ))
}

/// Send the local part `i` of the selection to rank `i` of `comm`.
pub fn redistribute_by_splitters<C: Communicator>(
    octants: &[Octant],
    selection: &SplitterSelection,
    comm: &C,
) -> Vec<Octant> {
    let counts = selection.counts();
    debug_assert_eq!(counts.len(), comm.size());
    debug_assert_eq!(counts.iter().sum::<usize>(), octants.len());
    comm.all_to_all_varcount(octants, &counts)
}

/// Remove duplicates and overlaps across process boundaries.
///
/// Each local array must be sorted, free of duplicates and linear, and the
/// arrays must be globally sorted. An octant that equals the last octant of
/// the previous non-empty process is dropped. A trailing octant that is an
/// ancestor of the first octant of the next non-empty process is dropped,
/// repeatedly, until no process changes.
pub fn remove_boundary_duplicates<C: Communicator>(
    sorted: &mut Vec<Octant>,
    comm: &C,
) -> Result<()> {
    // Only processes with data take part in the exchange.
    let nonempty = comm.split(usize::from(!sorted.is_empty()))?;
    if sorted.is_empty() {
        return Ok(());
    }

    let last = sorted.last().copied().into_iter().collect::<Vec<_>>();
    let (from_prev, _) = nonempty.exchange_neighbours(&[], last.as_slice());
    if let Some(prev_last) = from_prev.first() {
        let equal = sorted.iter().take_while(|o| *o == prev_last).count();
        sorted.drain(..equal);
    }

    // A process emptied by the merge forwards the first octant of its successor.
    let mut next_first: Option<Octant> = None;
    loop {
        let outgoing = sorted
            .first()
            .copied()
            .or(next_first)
            .into_iter()
            .collect::<Vec<_>>();
        let (_, from_next) = nonempty.exchange_neighbours(outgoing.as_slice(), &[]);
        next_first = from_next.first().copied();

        let mut changed = false;
        if let Some(next) = next_first {
            while sorted.last().is_some_and(|last| last.is_ancestor(&next)) {
                sorted.pop();
                changed = true;
            }
        }
        // The relayed octant has to reach the previous process as well.
        if sorted.is_empty() && outgoing.first().copied() != next_first {
            changed = true;
        }

        if nonempty.all_reduce_and(!changed) {
            return Ok(());
        }
    }
}

/// Repartition a globally sorted array into blocks of nearly equal size.
///
/// The order is kept. Process `r` receives the octants with global index in
/// `[r * n / p, (r + 1) * n / p)`.
pub fn block_partition<C: Communicator>(octants: Vec<Octant>, comm: &C) -> Vec<Octant> {
    let size = comm.size();
    let global = comm.all_reduce_sum(&[octants.len() as u64])[0] as usize;

    let end = global_inclusive_cumsum(&[octants.len()], comm)[0];
    let begin = end - octants.len();

    let bins = (0..size).map(|r| r * global / size).collect::<Vec<_>>();
    let keys = (begin..end).collect::<Vec<_>>();
    let counts = sort_to_bins(&keys, &bins);

    comm.all_to_all_varcount(&octants, &counts)
}
