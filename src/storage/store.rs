//! Memory-mapped parameter store.
//!
//! The backing file holds exactly `total_params` native-endian `u16` values,
//! no header, no checksum. Opening a file of any other size (or no file at
//! all) takes the reinitialization branch: the old content is discarded and
//! the file is rewritten with uniform random values in `[0, N)`.
//!
//! ```text
//! Uninitialized ──(size ok)──────────────────► Mapped ──close()──► Closed
//!       │                                        ▲
//!       └──(size mismatch)──► Initializing ──────┘
//! ```
//!
//! Writes through one handle are serialized by its writer queue. Several
//! handles (or processes) may map the same file, but nothing orders writes
//! across them; coordinating that is up to the caller.

use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config;
use crate::error::{Result, StoreError};
use crate::kernels::reduce;
use crate::storage::backend::{PlatformBackend, StorageBackend};
use crate::storage::writer::{Region, StoreCounters, WriteHandle, Writer};

/// Lifecycle of a store handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    /// Writing a fresh random image after a size mismatch.
    Initializing,
    Mapped,
    Closed,
}

/// Store configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Backing file.
    pub path: PathBuf,

    /// Number of `u16` elements.
    pub total_params: usize,

    /// Exclusive bound on stored values, `1..=65536`.
    ///
    /// Lookup tables stop at [`MAX_TABLE_DOMAIN`](crate::kernels::lut::MAX_TABLE_DOMAIN),
    /// so only stores at or below that bound can be trained.
    pub domain: usize,

    /// Seed for the reinitialization image (`None` = entropy).
    pub init_seed: Option<u64>,

    /// Bound of the writer queue (0 = unbounded).
    pub queue_depth: usize,

    /// How the backing file is opened.
    pub backend: Arc<dyn StorageBackend>,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>, total_params: usize) -> Self {
        Self {
            path: path.into(),
            total_params,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    pub fn with_domain(mut self, domain: usize) -> Self {
        self.domain = domain;
        self
    }

    /// Expected file length in bytes.
    pub fn byte_len(&self) -> Option<usize> {
        self.total_params.checked_mul(config::ELEMENT_SIZE)
    }

    fn validate(&self) -> Result<usize> {
        if self.total_params == 0 {
            return Err(StoreError::InvalidConfig(
                "total_params must be at least 1".to_string(),
            ));
        }
        if self.domain == 0 || self.domain > config::MAX_DOMAIN_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "domain {} outside 1..={}",
                self.domain,
                config::MAX_DOMAIN_SIZE
            )));
        }
        self.byte_len().ok_or_else(|| {
            StoreError::InvalidConfig(format!("{} elements overflow usize bytes", self.total_params))
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./params.bin"),
            total_params: config::TOTAL_PARAMS,
            domain: config::DOMAIN_SIZE,
            init_seed: None,
            queue_depth: config::WRITE_QUEUE_DEPTH,
            backend: Arc::new(PlatformBackend),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("path", &self.path)
            .field("total_params", &self.total_params)
            .field("domain", &self.domain)
            .field("init_seed", &self.init_seed)
            .field("queue_depth", &self.queue_depth)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Snapshot of store activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub updates_applied: u64,
    pub values_written: u64,
    pub syncs: u64,
}

/// Resources that exist only while the store is mapped.
struct Mapped {
    _file: File,
    region: Arc<Region>,
    writer: Writer,
}

/// A file-backed array of `u16` parameters.
pub struct ParamStore {
    path: PathBuf,
    total_params: usize,
    domain: usize,
    state: StoreState,
    reinitialized: bool,
    mapped: Option<Mapped>,
    counters: Arc<StoreCounters>,
}

impl ParamStore {
    /// Open (or create) a store of `total_params` elements at `path` with
    /// default settings.
    pub fn open(path: impl AsRef<Path>, total_params: usize) -> Result<Self> {
        Self::open_with(StoreConfig::new(path.as_ref(), total_params))
    }

    /// Open with explicit configuration.
    pub fn open_with(cfg: StoreConfig) -> Result<Self> {
        let byte_len = cfg.validate()?;
        let path = cfg.path.clone();
        let mut state = StoreState::Uninitialized;

        let file = cfg
            .backend
            .open_rw(&path)
            .map_err(|e| StoreError::io("open", &path, e))?;
        let existing = file
            .metadata()
            .map_err(|e| StoreError::io("stat", &path, e))?
            .len();

        let reinitialize = existing != byte_len as u64;
        if reinitialize {
            transition(&path, &mut state, StoreState::Initializing);
            tracing::info!(
                path = %path.display(),
                existing_bytes = existing,
                expected_bytes = byte_len,
                "size mismatch, reinitializing store"
            );
            file.set_len(0)
                .map_err(|e| StoreError::io("truncate", &path, e))?;
            file.set_len(byte_len as u64)
                .map_err(|e| StoreError::io("resize", &path, e))?;
        }

        // SAFETY: the mapping is only touched through `Region`, which hands
        // out atomic cells. Concurrent modification by other processes is
        // documented as the caller's responsibility.
        let mut mmap = unsafe { MmapOptions::new().len(byte_len).map_mut(&file) }
            .map_err(|e| StoreError::io("map", &path, e))?;

        if reinitialize {
            let seed = cfg.init_seed.unwrap_or_else(rand::random);
            fill_uniform(&mut mmap, cfg.domain, seed)?;
            mmap.flush()
                .map_err(|e| StoreError::io("flush", &path, e))?;
        }

        let region = Arc::new(Region::new(mmap, cfg.total_params)?);
        let counters = Arc::new(StoreCounters::default());
        let writer = Writer::spawn(region.clone(), counters.clone(), cfg.queue_depth)
            .map_err(|e| StoreError::io("spawn writer for", &path, e))?;

        transition(&path, &mut state, StoreState::Mapped);
        tracing::debug!(
            path = %path.display(),
            total_params = cfg.total_params,
            backend = cfg.backend.name(),
            reinitialized = reinitialize,
            "store mapped"
        );

        Ok(Self {
            path,
            total_params: cfg.total_params,
            domain: cfg.domain,
            state,
            reinitialized: reinitialize,
            mapped: Some(Mapped {
                _file: file,
                region,
                writer,
            }),
            counters,
        })
    }

    fn mapped(&self) -> Result<&Mapped> {
        self.mapped.as_ref().ok_or(StoreError::Closed)
    }

    /// Zero-copy view over every element. Never blocks.
    pub fn view(&self) -> Result<ParamView<'_>> {
        Ok(ParamView {
            cells: self.mapped()?.region.cells(),
        })
    }

    /// Queue `values` for writing at `offset` and return a completion handle.
    ///
    /// Range and domain are checked before anything is queued. Writes issued
    /// through this handle land in call order.
    pub fn update(&self, values: Vec<u16>, offset: usize) -> Result<WriteHandle> {
        let mapped = self.mapped()?;
        let end = offset.checked_add(values.len());
        if end.map_or(true, |end| end > self.total_params) {
            return Err(StoreError::Range {
                offset,
                len: values.len(),
                total: self.total_params,
            });
        }
        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|&(_, &v)| v as usize >= self.domain)
        {
            return Err(StoreError::ValueOutOfDomain {
                index,
                value,
                domain: self.domain,
            });
        }
        mapped.writer.submit(offset, values)
    }

    /// `update` followed by a wait.
    pub fn update_blocking(&self, values: Vec<u16>, offset: usize) -> Result<()> {
        self.update(values, offset)?.wait()
    }

    /// Flush dirty mapped pages to the backing file.
    pub fn sync(&self) -> Result<()> {
        let mapped = self.mapped()?;
        mapped
            .region
            .flush()
            .map_err(|e| StoreError::io("flush", &self.path, e))?;
        self.counters.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Apply all queued writes, flush, unmap and release the file.
    ///
    /// Every later call on this handle fails with [`StoreError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        let Some(mut mapped) = self.mapped.take() else {
            return Err(StoreError::Closed);
        };
        mapped.writer.shutdown();
        let flushed = mapped
            .region
            .flush()
            .map_err(|e| StoreError::io("flush", &self.path, e));
        drop(mapped);
        transition(&self.path, &mut self.state, StoreState::Closed);
        flushed
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StoreState::Closed
    }

    pub fn total_params(&self) -> usize {
        self.total_params
    }

    pub fn domain(&self) -> usize {
        self.domain
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length in bytes.
    pub fn byte_len(&self) -> usize {
        self.total_params * config::ELEMENT_SIZE
    }

    /// Whether `open` discarded and regenerated the file.
    pub fn was_reinitialized(&self) -> bool {
        self.reinitialized
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            updates_applied: self.counters.updates_applied.load(Ordering::Relaxed),
            values_written: self.counters.values_written.load(Ordering::Relaxed),
            syncs: self.counters.syncs.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ParamStore {
    fn drop(&mut self) {
        if self.mapped.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "close on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("path", &self.path)
            .field("total_params", &self.total_params)
            .field("domain", &self.domain)
            .field("state", &self.state)
            .finish()
    }
}

fn transition(path: &Path, state: &mut StoreState, next: StoreState) {
    tracing::debug!(path = %path.display(), from = ?*state, to = ?next, "store state");
    *state = next;
}

/// Fill a fresh mapping with uniform values in `[0, domain)`.
///
/// Chunks are seeded independently from `seed`, so the image is identical
/// for a given seed regardless of thread count.
fn fill_uniform(mmap: &mut MmapMut, domain: usize, seed: u64) -> Result<()> {
    let values: &mut [u16] = bytemuck_cast(&mut mmap[..])?;
    let dist = Uniform::new(0u32, domain as u32);
    values
        .par_chunks_mut(config::INIT_CHUNK)
        .enumerate()
        .for_each(|(i, chunk)| {
            let mut rng = StdRng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
            for v in chunk.iter_mut() {
                *v = dist.sample(&mut rng) as u16;
            }
        });
    Ok(())
}

fn bytemuck_cast(bytes: &mut [u8]) -> Result<&mut [u16]> {
    bytemuck::try_cast_slice_mut(bytes)
        .map_err(|e| StoreError::InvalidConfig(format!("mapped region is not a u16 array: {e:?}")))
}

/// A borrowed, zero-copy view of the whole store (or a sub-range of it).
///
/// Element reads are relaxed atomic loads: a read that overlaps an
/// unawaited write may see old or new values, element by element.
#[derive(Clone, Copy)]
pub struct ParamView<'a> {
    cells: &'a [AtomicU16],
}

impl<'a> ParamView<'a> {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<u16> {
        self.cells.get(index).map(|c| c.load(Ordering::Relaxed))
    }

    /// Sub-view over `range`, or `None` when it falls outside this view.
    pub fn slice(&self, range: Range<usize>) -> Option<ParamView<'a>> {
        self.cells.get(range).map(|cells| ParamView { cells })
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = u16> + 'a {
        self.cells.iter().map(|c| c.load(Ordering::Relaxed))
    }

    pub fn par_iter(&self) -> impl IndexedParallelIterator<Item = u16> + 'a {
        self.cells.par_iter().map(|c| c.load(Ordering::Relaxed))
    }

    /// Copy out the viewed values.
    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().collect()
    }

    /// `(Σ values) mod n`; 0 when `n == 0`.
    pub fn sum_mod(&self, n: usize) -> u16 {
        reduce::sum_mod(self.par_iter(), n)
    }

    pub fn checksum(&self) -> u64 {
        reduce::checksum(self.iter())
    }
}

impl std::fmt::Debug for ParamView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamView").field("len", &self.len()).finish()
    }
}
