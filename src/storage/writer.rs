//! Single-writer update queue over a mapped region.
//!
//! Every store handle owns one writer thread. `update` enqueues a job and
//! returns a [`WriteHandle`]; the writer applies jobs in FIFO order while
//! holding the region's write lock, then signals the handle. Callers pick
//! fire-and-forget (drop the handle) or an explicit, optionally bounded,
//! wait.
//!
//! The mapped bytes are exposed as `AtomicU16` cells. Readers never take the
//! lock and may see a write half-applied; they never see a torn element.

use std::slice;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::error::{Result, StoreError};

/// Counters shared between a store and its writer.
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    pub updates_applied: AtomicU64,
    pub values_written: AtomicU64,
    pub syncs: AtomicU64,
}

/// A mapped file viewed as `len` atomic `u16` cells.
pub(crate) struct Region {
    mmap: MmapMut,
    cells: *const AtomicU16,
    len: usize,
    write_lock: Mutex<()>,
}

// SAFETY: all access to the mapped bytes goes through `AtomicU16` cells or
// `MmapMut::flush`; the pointer stays valid for as long as `mmap` lives.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Wrap a mapping of exactly `len` `u16` elements.
    pub(crate) fn new(mut mmap: MmapMut, len: usize) -> Result<Self> {
        let bytes = len * std::mem::size_of::<u16>();
        let ptr = mmap.as_mut_ptr();
        if mmap.len() != bytes || (ptr as usize) % std::mem::align_of::<AtomicU16>() != 0 {
            return Err(StoreError::InvalidConfig(format!(
                "mapping of {} bytes cannot hold {len} aligned u16 values",
                mmap.len()
            )));
        }
        Ok(Self {
            mmap,
            cells: ptr as *const AtomicU16,
            len,
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub(crate) fn cells(&self) -> &[AtomicU16] {
        // SAFETY: `cells` points at `len` initialized, aligned u16 values in
        // a live mapping; AtomicU16 has the same layout as u16.
        unsafe { slice::from_raw_parts(self.cells, self.len) }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Copy `values` to `offset` under the exclusive write lock.
    /// Bounds are checked by the caller before the job is queued.
    fn write(&self, offset: usize, values: &[u16]) {
        let _guard = self.write_lock.lock();
        let dst = &self.cells()[offset..offset + values.len()];
        for (cell, &v) in dst.iter().zip(values) {
            cell.store(v, Ordering::Relaxed);
        }
    }

    /// Flush dirty pages. Holds the write lock so no update is captured
    /// half-applied.
    pub(crate) fn flush(&self) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        self.mmap.flush()
    }
}

struct WriteJob {
    offset: usize,
    values: Vec<u16>,
    done: Sender<()>,
}

/// Completion handle for one queued update.
///
/// Dropping it abandons the wait; the write is still applied.
#[must_use = "drop the handle explicitly for fire-and-forget writes"]
pub struct WriteHandle {
    offset: usize,
    len: usize,
    done: Receiver<()>,
    landed: bool,
}

impl WriteHandle {
    /// First element written.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of elements written.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Block until the write has landed in the mapped pages.
    pub fn wait(self) -> Result<()> {
        if self.landed {
            return Ok(());
        }
        self.done.recv().map_err(|_| StoreError::Closed)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// A timed-out write is not rolled back and may still land later.
    pub fn wait_timeout(self, timeout: Duration) -> Result<()> {
        if self.landed {
            return Ok(());
        }
        match self.done.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(StoreError::WriteTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
        }
    }

    /// Non-blocking poll: `Some(Ok(()))` once applied, `None` while queued.
    pub fn try_wait(&mut self) -> Option<Result<()>> {
        if self.landed {
            return Some(Ok(()));
        }
        match self.done.try_recv() {
            Ok(()) => {
                self.landed = true;
                Some(Ok(()))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::Closed)),
        }
    }
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("landed", &self.landed)
            .finish()
    }
}

/// The writer thread and the sending half of its queue.
pub(crate) struct Writer {
    tx: Option<Sender<WriteJob>>,
    thread: Option<JoinHandle<()>>,
}

impl Writer {
    /// Start the writer thread. `depth == 0` means an unbounded queue.
    pub(crate) fn spawn(
        region: Arc<Region>,
        counters: Arc<StoreCounters>,
        depth: usize,
    ) -> std::io::Result<Self> {
        let (tx, rx) = if depth == 0 {
            crossbeam_channel::unbounded::<WriteJob>()
        } else {
            crossbeam_channel::bounded::<WriteJob>(depth)
        };

        let thread = std::thread::Builder::new()
            .name("lutstore-writer".to_string())
            .spawn(move || {
                tracing::debug!(len = region.len(), "writer started");
                for job in rx {
                    region.write(job.offset, &job.values);
                    counters.updates_applied.fetch_add(1, Ordering::Relaxed);
                    counters
                        .values_written
                        .fetch_add(job.values.len() as u64, Ordering::Relaxed);
                    // Receiver gone means the caller chose fire-and-forget.
                    let _ = job.done.send(());
                }
                tracing::debug!("writer drained");
            })?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Queue a bounds-checked write.
    pub(crate) fn submit(&self, offset: usize, values: Vec<u16>) -> Result<WriteHandle> {
        let tx = self.tx.as_ref().ok_or(StoreError::Closed)?;
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let len = values.len();
        tx.send(WriteJob {
            offset,
            values,
            done: done_tx,
        })
        .map_err(|_| StoreError::Closed)?;
        Ok(WriteHandle {
            offset,
            len,
            done: done_rx,
            landed: false,
        })
    }

    /// Close the queue, let the writer apply everything already queued, and
    /// join it.
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("writer thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap2::MmapOptions;

    fn anon_region(len: usize) -> Arc<Region> {
        let mmap = MmapOptions::new()
            .len(len * 2)
            .map_anon()
            .expect("anonymous map should succeed");
        Arc::new(Region::new(mmap, len).expect("region should fit"))
    }

    fn snapshot(region: &Region) -> Vec<u16> {
        region.cells().iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    #[test]
    fn test_region_rejects_mismatched_length() {
        let mmap = MmapOptions::new().len(10).map_anon().unwrap();
        assert!(Region::new(mmap, 6).is_err());
    }

    #[test]
    fn test_writer_applies_and_signals() {
        let region = anon_region(16);
        let counters = Arc::new(StoreCounters::default());
        let mut writer = Writer::spawn(region.clone(), counters.clone(), 4).unwrap();

        writer.submit(4, vec![7, 8, 9]).unwrap().wait().unwrap();
        let data = snapshot(&region);
        assert_eq!(&data[4..7], &[7, 8, 9]);
        assert_eq!(data[3], 0);
        assert_eq!(data[7], 0);

        writer.shutdown();
        assert_eq!(counters.updates_applied.load(Ordering::Relaxed), 1);
        assert_eq!(counters.values_written.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_timed_out_write_still_lands() {
        let region = anon_region(8);
        let counters = Arc::new(StoreCounters::default());
        let mut writer = Writer::spawn(region.clone(), counters.clone(), 4).unwrap();

        let guard = region.write_lock.lock();
        let handle = writer.submit(0, vec![9; 4]).unwrap();
        let err = handle.wait_timeout(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, StoreError::WriteTimeout(d) if d == Duration::from_millis(30)));
        assert_eq!(&snapshot(&region)[..4], &[0, 0, 0, 0]);
        drop(guard);

        writer.shutdown();
        assert_eq!(&snapshot(&region)[..4], &[9, 9, 9, 9]);
        assert_eq!(counters.updates_applied.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fire_and_forget_writes_apply_in_order() {
        let region = anon_region(8);
        let counters = Arc::new(StoreCounters::default());
        let mut writer = Writer::spawn(region.clone(), counters, 0).unwrap();

        for v in 1..=50u16 {
            drop(writer.submit(0, vec![v; 8]).unwrap());
        }
        writer.shutdown();
        assert_eq!(snapshot(&region), vec![50; 8]);
    }

    #[test]
    fn test_submit_after_shutdown_is_closed() {
        let region = anon_region(4);
        let mut writer = Writer::spawn(region, Arc::new(StoreCounters::default()), 1).unwrap();
        writer.shutdown();
        let err = writer.submit(0, vec![1]).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_try_wait_eventually_lands() {
        let region = anon_region(4);
        let writer = Writer::spawn(region, Arc::new(StoreCounters::default()), 1).unwrap();
        let mut handle = writer.submit(1, vec![3]).unwrap();
        let landed = loop {
            if let Some(r) = handle.try_wait() {
                break r;
            }
            std::thread::yield_now();
        };
        assert!(landed.is_ok());
        assert!(handle.wait().is_ok());
    }
}
