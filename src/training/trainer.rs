//! Read → lookup → write training loop over the store's views.
//!
//! One step:
//!   1. Sample `batch` indices uniformly from `[0, vocab)`
//!   2. `p = Σ projection mod N`, `o = Σ output mod N` (full-view reductions)
//!   3. `mid[i] = xor[idx[i]][p]`
//!   4. `out[i] = combine[mid[i]][o]` (mul by default)
//!   5. Write `out` back to the store at the step's offset
//!
//! This is not gradient descent. It is a reproducible bounded transform that
//! drives full-view reads, random gathers and batched writes through the
//! store. Any error ends the run; nothing is retried.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Result, StoreError};
use crate::kernels::lut::{tables, LookupTables, Table, MAX_TABLE_DOMAIN};
use crate::layout::views::{derive_views, ModelViews, ParamSchema};
use crate::runtime::health::{HealthMonitor, HealthReport};
use crate::storage::store::ParamStore;
use crate::storage::writer::WriteHandle;

/// Whether a step waits for its write to land.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Block until the write is in the mapped pages.
    Await,
    /// Queue the write and move on; outstanding writes are joined at the end
    /// of `train`.
    FireAndForget,
}

/// Where each step writes its result vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OffsetPolicy {
    /// Every step writes at the same offset.
    Fixed { offset: usize },
    /// Step `k` writes at `start + (k mod slots) * batch`, where
    /// `slots = len / batch`.
    Rolling { start: usize, len: usize },
}

impl OffsetPolicy {
    pub fn offset_for(&self, step: u64, batch: usize) -> Result<usize> {
        match *self {
            OffsetPolicy::Fixed { offset } => Ok(offset),
            OffsetPolicy::Rolling { start, len } => {
                let slots = if batch == 0 { 0 } else { len / batch };
                if slots == 0 {
                    return Err(StoreError::InvalidConfig(format!(
                        "rolling window of {len} values cannot hold a batch of {batch}"
                    )));
                }
                ((step % slots as u64) as usize)
                    .checked_mul(batch)
                    .and_then(|rel| start.checked_add(rel))
                    .ok_or_else(|| {
                        StoreError::InvalidConfig(format!(
                            "rolling offset for step {step} overflows from start {start}"
                        ))
                    })
            }
        }
    }
}

/// Trainer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Indices sampled (and values written) per step.
    pub batch_size: usize,

    /// Table applied to the xor intermediate and the output scalar.
    pub combine_table: Table,

    pub write_mode: WriteMode,

    pub offsets: OffsetPolicy,

    /// Log progress every N steps (0 = never).
    pub log_every: u64,

    /// Flush the store every N steps (0 = only at the caller's discretion).
    pub sync_every: u64,

    /// Index sampling seed (`None` = entropy).
    pub seed: Option<u64>,

    /// Upper bound on an awaited write, in milliseconds.
    pub write_timeout_ms: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: config::BATCH_SIZE,
            combine_table: Table::Mul,
            write_mode: WriteMode::Await,
            offsets: OffsetPolicy::Rolling {
                start: 0,
                len: config::default_required_params(),
            },
            log_every: 100,
            sync_every: 0,
            seed: None,
            write_timeout_ms: None,
        }
    }
}

/// Everything one step computed.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub step: u64,
    pub offset: usize,
    pub indices: Vec<usize>,
    pub projection_scalar: u16,
    pub output_scalar: u16,
    pub intermediate: Vec<u16>,
    pub result: Vec<u16>,
}

/// Summary of a `train` call.
#[derive(Clone, Debug)]
pub struct TrainReport {
    /// Steps run by this call.
    pub steps: u64,
    /// Steps run by this trainer so far.
    pub total_steps: u64,
    /// Values written by the store handle so far.
    pub values_written: u64,
    pub elapsed: Duration,
    /// Fingerprint of the whole store after the run.
    pub checksum: u64,
    pub health: HealthReport,
}

/// Drives steps over one store.
pub struct Trainer<'a> {
    store: &'a ParamStore,
    schema: ParamSchema,
    views: ModelViews<'a>,
    tables: &'a LookupTables,
    config: TrainerConfig,
    rng: StdRng,
    health: HealthMonitor,
    steps_done: u64,
    pending: Vec<WriteHandle>,
}

impl<'a> Trainer<'a> {
    /// Bind a trainer to `store` using the process-wide lookup tables.
    pub fn new(store: &'a ParamStore, schema: ParamSchema, config: TrainerConfig) -> Result<Self> {
        Self::with_tables(store, schema, config, tables())
    }

    pub fn with_tables(
        store: &'a ParamStore,
        schema: ParamSchema,
        config: TrainerConfig,
        tables: &'a LookupTables,
    ) -> Result<Self> {
        if schema.vocab == 0 {
            return Err(StoreError::InvalidConfig("vocabulary must not be empty".to_string()));
        }
        if store.domain() > MAX_TABLE_DOMAIN {
            return Err(StoreError::InvalidConfig(format!(
                "store domain {} exceeds the largest trainable table domain {MAX_TABLE_DOMAIN}",
                store.domain()
            )));
        }
        if tables.domain() != store.domain() {
            return Err(StoreError::InvalidConfig(format!(
                "table domain {} differs from store domain {}",
                tables.domain(),
                store.domain()
            )));
        }
        let views = derive_views(store, &schema)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            store,
            schema,
            views,
            tables,
            config,
            rng,
            health: HealthMonitor::new(),
            steps_done: 0,
            pending: Vec::new(),
        })
    }

    pub fn views(&self) -> &ModelViews<'a> {
        &self.views
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn steps_done(&self) -> u64 {
        self.steps_done
    }

    /// Writes queued in fire-and-forget mode and not yet observed landing.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Run one step writing `batch_size` values at `offset`.
    pub fn step(&mut self, batch_size: usize, offset: usize) -> Result<StepOutcome> {
        if batch_size == 0 {
            return Err(StoreError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        let started = Instant::now();
        let n = self.tables.domain();

        let vocab = self.schema.vocab;
        let indices: Vec<usize> = (0..batch_size)
            .map(|_| self.rng.gen_range(0..vocab))
            .collect();

        let projection_scalar = self.views.projection.sum_mod(n);
        let intermediate = self
            .tables
            .gather(Table::Xor, &indices, projection_scalar as usize)?;

        let output_scalar = self.views.output.sum_mod(n);
        let result = intermediate
            .iter()
            .map(|&v| {
                self.tables
                    .lookup(self.config.combine_table, v as usize, output_scalar as usize)
            })
            .collect::<Result<Vec<u16>, _>>()?;

        let handle = self.store.update(result.clone(), offset)?;
        let wait_started = Instant::now();
        match self.config.write_mode {
            WriteMode::Await => match self.config.write_timeout_ms {
                Some(ms) => handle.wait_timeout(Duration::from_millis(ms))?,
                None => handle.wait()?,
            },
            WriteMode::FireAndForget => {
                self.pending.push(handle);
                self.reap_pending()?;
            }
        }
        let write_wait = wait_started.elapsed();

        let step = self.steps_done;
        self.steps_done += 1;
        self.health.record_step(
            step,
            started.elapsed().as_secs_f32() * 1000.0,
            write_wait.as_secs_f32() * 1000.0,
        );

        Ok(StepOutcome {
            step,
            offset,
            indices,
            projection_scalar,
            output_scalar,
            intermediate,
            result,
        })
    }

    /// Run `steps` steps with offsets from the configured policy.
    pub fn train(&mut self, steps: u64) -> Result<TrainReport> {
        let started = Instant::now();
        let batch = self.config.batch_size;
        tracing::info!(
            steps,
            batch,
            mode = ?self.config.write_mode,
            combine = %self.config.combine_table,
            "training started"
        );

        for _ in 0..steps {
            let offset = self.config.offsets.offset_for(self.steps_done, batch)?;
            let outcome = self.step(batch, offset)?;
            let done = self.steps_done;

            if self.config.sync_every > 0 && done % self.config.sync_every == 0 {
                self.flush_pending()?;
                self.store.sync()?;
            }

            if self.config.log_every > 0 && done % self.config.log_every == 0 {
                let report = self.health.report();
                tracing::info!(
                    step = done,
                    offset = outcome.offset,
                    p = outcome.projection_scalar,
                    o = outcome.output_scalar,
                    avg_step_ms = report.avg_step_ms,
                    p99_step_ms = report.p99_step_ms,
                    pending = self.pending.len(),
                    status = ?report.status,
                    "training progress"
                );
            }
        }

        self.flush_pending()?;
        let report = TrainReport {
            steps,
            total_steps: self.steps_done,
            values_written: self.store.stats().values_written,
            elapsed: started.elapsed(),
            checksum: self.store.view()?.checksum(),
            health: self.health.report(),
        };
        tracing::info!(
            steps = report.steps,
            elapsed_ms = report.elapsed.as_millis() as u64,
            checksum = format_args!("{:016x}", report.checksum),
            "training finished"
        );
        Ok(report)
    }

    /// Drop handles whose writes already landed; surface the first failure.
    fn reap_pending(&mut self) -> Result<()> {
        let mut first_err = None;
        self.pending.retain_mut(|h| match h.try_wait() {
            None => true,
            Some(Ok(())) => false,
            Some(Err(e)) => {
                first_err.get_or_insert(e);
                false
            }
        });
        first_err.map_or(Ok(()), Err)
    }

    /// Wait for every outstanding fire-and-forget write.
    pub fn flush_pending(&mut self) -> Result<()> {
        let mut first_err = None;
        for handle in self.pending.drain(..) {
            if let Err(e) = handle.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
