// rust/scheduler-core/src/shard/splitter.rs

//! Dataset splitting strategies.
//!
//! A splitter partitions `[0, dataset_size)` into fixed-size shards, once per
//! epoch, and emits them lazily in batches of at most `max_shard_count`.
//! Every permutation is derived from `(seed, epoch)`, so a splitter restored
//! from a [`SplitterCursor`] reproduces exactly the shards it would have
//! emitted before the restart.

use std::ops::Range;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::task::Shard;
use crate::error::{Result, SchedulerError};

/// Upper bound on the number of shards materialised in one batch.
pub const DEFAULT_MAX_SHARD_COUNT: u64 = 50_000;

/// How the dataset is laid out in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Rows addressed by index ranges. Shuffling permutes shard order.
    #[default]
    Table,
    /// Line records. Shuffling permutes record indices across the epoch.
    Text,
}

/// Restart position of a splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterCursor {
    /// Epoch currently being emitted (zero-based).
    pub epoch: u32,
    /// Ordinal of the next shard to emit within `epoch`, in emission order.
    pub next_ordinal: u64,
    /// Seed all per-epoch permutations are derived from.
    pub seed: u64,
}

/// Parameters for [`create_dataset_splitter`].
#[derive(Debug, Clone)]
pub struct SplitterParams {
    pub dataset_name: String,
    pub dataset_size: u64,
    pub shard_size: u64,
    pub num_epochs: u32,
    pub shuffle: bool,
    pub storage_kind: StorageKind,
    pub max_shard_count: u64,
    /// Fixed shuffle seed; a random one is drawn when `None`.
    pub seed: Option<u64>,
}

/// Trait for dataset splitting strategies.
pub trait DatasetSplitter: Send + Sync + std::fmt::Debug {
    /// Name of the dataset being split.
    fn dataset_name(&self) -> &str;

    /// Number of records in one epoch pass.
    fn dataset_size(&self) -> u64;

    /// Number of records per shard (the last shard of an epoch may be shorter).
    fn shard_size(&self) -> u64;

    /// Total number of epoch passes.
    fn num_epochs(&self) -> u32;

    /// Storage layout this splitter was built for.
    fn storage_kind(&self) -> StorageKind;

    /// Whether shards are emitted in a permuted order.
    fn shuffle(&self) -> bool;

    /// Materialises the next batch of shards and advances the cursor.
    ///
    /// Returns an empty vector once every epoch has been emitted.
    fn next_shards(&mut self) -> Vec<Shard>;

    /// Whether all shards of all epochs have been emitted.
    fn finished(&self) -> bool;

    /// Number of epochs whose shards have started to be emitted.
    fn epoch(&self) -> u32;

    /// Current restart position.
    fn cursor(&self) -> SplitterCursor;

    /// Moves the splitter to a previously captured position.
    fn restore_cursor(&mut self, cursor: SplitterCursor);
}

/// Geometry and cursor shared by all splitters.
#[derive(Debug, Clone)]
struct SplitState {
    dataset_name: String,
    dataset_size: u64,
    shard_size: u64,
    num_epochs: u32,
    shuffle: bool,
    max_shard_count: u64,
    cursor: SplitterCursor,
}

impl SplitState {
    fn new(params: &SplitterParams) -> Self {
        Self {
            dataset_name: params.dataset_name.clone(),
            dataset_size: params.dataset_size,
            shard_size: params.shard_size,
            num_epochs: params.num_epochs,
            shuffle: params.shuffle,
            max_shard_count: params.max_shard_count,
            cursor: SplitterCursor {
                epoch: 0,
                next_ordinal: 0,
                seed: params.seed.unwrap_or_else(rand::random),
            },
        }
    }

    fn shards_per_epoch(&self) -> u64 {
        self.dataset_size.div_ceil(self.shard_size)
    }

    fn finished(&self) -> bool {
        self.shards_per_epoch() == 0 || self.cursor.epoch >= self.num_epochs
    }

    fn epochs_started(&self) -> u32 {
        if self.cursor.next_ordinal > 0 {
            self.cursor.epoch + 1
        } else {
            self.cursor.epoch
        }
    }

    /// Emission positions covered by the next batch.
    fn batch_ordinals(&self) -> Range<u64> {
        let total = self.shards_per_epoch();
        let start = self.cursor.next_ordinal.min(total);
        let end = start.saturating_add(self.max_shard_count).min(total);
        start..end
    }

    /// Index range of the shard with the given ordinal.
    fn shard_bounds(&self, ordinal: u64) -> Range<u64> {
        let start = ordinal * self.shard_size;
        let end = start.saturating_add(self.shard_size).min(self.dataset_size);
        start..end
    }

    fn epoch_rng(&self, epoch: u32) -> ChaCha8Rng {
        let mixed = self.cursor.seed ^ u64::from(epoch).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ChaCha8Rng::seed_from_u64(mixed)
    }

    fn advance(&mut self, emitted: &Range<u64>) {
        self.cursor.next_ordinal = emitted.end;
        if self.cursor.next_ordinal >= self.shards_per_epoch() {
            self.cursor.epoch += 1;
            self.cursor.next_ordinal = 0;
        }
    }
}

/// Splitter for index-addressed (table) datasets.
///
/// With shuffling enabled the order of an epoch's shards is permuted; the
/// records inside one shard stay contiguous.
#[derive(Debug)]
pub struct TableDatasetSplitter {
    state: SplitState,
    /// Shard order of the epoch it was computed for.
    order: Option<(u32, Vec<u64>)>,
}

impl TableDatasetSplitter {
    pub fn new(params: &SplitterParams) -> Self {
        Self {
            state: SplitState::new(params),
            order: None,
        }
    }

    fn epoch_order(&mut self, epoch: u32) -> &[u64] {
        let stale = !matches!(&self.order, Some((cached, _)) if *cached == epoch);
        if stale {
            let mut order: Vec<u64> = (0..self.state.shards_per_epoch()).collect();
            order.shuffle(&mut self.state.epoch_rng(epoch));
            self.order = Some((epoch, order));
        }
        match &self.order {
            Some((_, order)) => order,
            None => &[],
        }
    }
}

impl DatasetSplitter for TableDatasetSplitter {
    fn dataset_name(&self) -> &str {
        &self.state.dataset_name
    }

    fn dataset_size(&self) -> u64 {
        self.state.dataset_size
    }

    fn shard_size(&self) -> u64 {
        self.state.shard_size
    }

    fn num_epochs(&self) -> u32 {
        self.state.num_epochs
    }

    fn storage_kind(&self) -> StorageKind {
        StorageKind::Table
    }

    fn shuffle(&self) -> bool {
        self.state.shuffle
    }

    fn next_shards(&mut self) -> Vec<Shard> {
        if self.state.finished() {
            return Vec::new();
        }

        let epoch = self.state.cursor.epoch;
        let ordinals = self.state.batch_ordinals();

        let selected: Vec<u64> = if self.state.shuffle {
            let (start, end) = (ordinals.start as usize, ordinals.end as usize);
            self.epoch_order(epoch)[start..end].to_vec()
        } else {
            ordinals.clone().collect()
        };

        let shards = selected
            .into_iter()
            .map(|ordinal| {
                let bounds = self.state.shard_bounds(ordinal);
                Shard::new(self.state.dataset_name.clone(), bounds.start, bounds.end, epoch)
            })
            .collect();

        self.state.advance(&ordinals);
        shards
    }

    fn finished(&self) -> bool {
        self.state.finished()
    }

    fn epoch(&self) -> u32 {
        self.state.epochs_started()
    }

    fn cursor(&self) -> SplitterCursor {
        self.state.cursor
    }

    fn restore_cursor(&mut self, cursor: SplitterCursor) {
        self.state.cursor = cursor;
        self.order = None;
    }
}

/// Splitter for line-oriented (text) datasets.
///
/// With shuffling enabled every record index of the epoch is permuted and
/// each shard carries the record indices it covers.
#[derive(Debug)]
pub struct TextDatasetSplitter {
    state: SplitState,
    /// Record permutation of the epoch it was computed for.
    permutation: Option<(u32, Vec<u64>)>,
}

impl TextDatasetSplitter {
    pub fn new(params: &SplitterParams) -> Self {
        Self {
            state: SplitState::new(params),
            permutation: None,
        }
    }

    fn epoch_permutation(&mut self, epoch: u32) -> &[u64] {
        let stale = !matches!(&self.permutation, Some((cached, _)) if *cached == epoch);
        if stale {
            let mut indices: Vec<u64> = (0..self.state.dataset_size).collect();
            indices.shuffle(&mut self.state.epoch_rng(epoch));
            self.permutation = Some((epoch, indices));
        }
        match &self.permutation {
            Some((_, indices)) => indices,
            None => &[],
        }
    }
}

impl DatasetSplitter for TextDatasetSplitter {
    fn dataset_name(&self) -> &str {
        &self.state.dataset_name
    }

    fn dataset_size(&self) -> u64 {
        self.state.dataset_size
    }

    fn shard_size(&self) -> u64 {
        self.state.shard_size
    }

    fn num_epochs(&self) -> u32 {
        self.state.num_epochs
    }

    fn storage_kind(&self) -> StorageKind {
        StorageKind::Text
    }

    fn shuffle(&self) -> bool {
        self.state.shuffle
    }

    fn next_shards(&mut self) -> Vec<Shard> {
        if self.state.finished() {
            return Vec::new();
        }

        let epoch = self.state.cursor.epoch;
        let ordinals = self.state.batch_ordinals();
        let bounds: Vec<Range<u64>> = ordinals
            .clone()
            .map(|ordinal| self.state.shard_bounds(ordinal))
            .collect();
        let name = self.state.dataset_name.clone();

        let shards = if self.state.shuffle {
            let permutation = self.epoch_permutation(epoch);
            bounds
                .into_iter()
                .map(|range| {
                    let mut shard = Shard::new(name.clone(), range.start, range.end, epoch);
                    shard.record_indices =
                        Some(permutation[range.start as usize..range.end as usize].to_vec());
                    shard
                })
                .collect()
        } else {
            bounds
                .into_iter()
                .map(|range| Shard::new(name.clone(), range.start, range.end, epoch))
                .collect()
        };

        self.state.advance(&ordinals);
        shards
    }

    fn finished(&self) -> bool {
        self.state.finished()
    }

    fn epoch(&self) -> u32 {
        self.state.epochs_started()
    }

    fn cursor(&self) -> SplitterCursor {
        self.state.cursor
    }

    fn restore_cursor(&mut self, cursor: SplitterCursor) {
        self.state.cursor = cursor;
        self.permutation = None;
    }
}

/// Create a dataset splitter for the given storage layout.
///
/// # Errors
///
/// Returns a configuration error if `shard_size` or `max_shard_count` is zero.
pub fn create_dataset_splitter(params: &SplitterParams) -> Result<Box<dyn DatasetSplitter>> {
    if params.shard_size == 0 {
        return Err(SchedulerError::config(format!(
            "shard size of dataset '{}' must be greater than 0",
            params.dataset_name
        )));
    }
    if params.max_shard_count == 0 {
        return Err(SchedulerError::config(
            "max_shard_count must be greater than 0",
        ));
    }

    Ok(match params.storage_kind {
        StorageKind::Table => Box::new(TableDatasetSplitter::new(params)),
        StorageKind::Text => Box::new(TextDatasetSplitter::new(params)),
    })
}
