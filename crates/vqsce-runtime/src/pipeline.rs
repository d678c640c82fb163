use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use vqsce_core::config::PipelineConfig;
use vqsce_core::error::{AugmentationError, PipelineError};
use vqsce_core::types::Patch;
use vqsce_observe::metrics::{Counter, DurationAgg, Gauge, ScopedTimer};

use crate::sink::Sink;
use crate::source::PatchSource;
use crate::types::{Batch, EpochSummary, PipelineSummary};

const PERMIT_UNIT_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy)]
pub struct RuntimeCaps {
    /// Bytes of assembled batches queued or held by the consumer.
    pub max_inflight_bytes: u64,
    pub max_queue_batches: usize,
    /// Patches buffered between the workers and the assembler.
    pub max_queue_patches: usize,
    pub num_workers: usize,
}

/// What one run produces, independent of how it is resourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPlan {
    pub mb_size: usize,
    pub epochs: usize,
    /// Run-level seed; every shuffle and worker stream derives from it.
    pub seed: u64,
    /// Reshuffle the visit order each epoch. Off for evaluation passes.
    pub shuffle: bool,
}

impl EpochPlan {
    pub fn from_config(cfg: &PipelineConfig, seed: u64) -> Self {
        Self {
            mb_size: cfg.expt.mb_size,
            epochs: cfg.expt.epochs,
            seed,
            shuffle: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub delivered_batches_total: Counter,
    pub delivered_patches_total: Counter,
    pub produced_patches_total: Counter,
    pub skipped_draws_total: Counter,
    pub dropped_patches_total: Counter,
    pub epochs_completed_total: Counter,
    pub inflight_bytes: Gauge,
    pub inflight_bytes_high_water: Gauge,
    pub draw_duration: DurationAgg,
}

impl RuntimeMetrics {
    fn on_inflight_add(&self, delta: u64) {
        let now = self.inflight_bytes.add(delta);
        self.inflight_bytes_high_water.max(now);
    }

    fn on_inflight_sub(&self, delta: u64) {
        self.inflight_bytes.sub(delta);
    }
}

/// A delivered batch. Holds its share of the inflight byte budget until dropped.
pub struct BatchLease {
    pub batch: Batch,
    pub bytes: u64,
    metrics: Arc<RuntimeMetrics>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for BatchLease {
    fn drop(&mut self) {
        self.metrics.on_inflight_sub(self.bytes);
    }
}

impl std::fmt::Debug for BatchLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLease")
            .field("epoch", &self.batch.epoch)
            .field("index", &self.batch.index)
            .field("patches", &self.batch.patch_count())
            .field("bytes", &self.bytes)
            .finish()
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    Batch(BatchLease),
    EpochComplete(EpochSummary),
}

/// Stops production. Cloneable; every clone controls the same stream.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolves once cancellation is requested or every handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Consumer end of a running pipeline.
pub struct BatchStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancelHandle,
    metrics: Arc<RuntimeMetrics>,
    task: JoinHandle<Result<PipelineSummary>>,
}

impl BatchStream {
    /// Next batch or epoch boundary. `None` once the run is finished or cancelled.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut cancel_rx = self.cancel.tx.subscribe();
        let event = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => None,
            ev = self.rx.recv() => ev,
        };
        self.on_event(event)
    }

    /// Like [`BatchStream::next`] for consumers outside the async runtime.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_next(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = self.rx.blocking_recv();
        if self.cancel.is_cancelled() {
            return None;
        }
        self.on_event(event)
    }

    fn on_event(&self, event: Option<StreamEvent>) -> Option<StreamEvent> {
        if let Some(StreamEvent::Batch(lease)) = &event {
            self.metrics.delivered_batches_total.inc();
            self.metrics
                .delivered_patches_total
                .inc_by(lease.batch.patch_count() as u64);
        }
        event
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stops consuming and waits for the producer to exit.
    ///
    /// Undelivered batches are discarded. A fatal producer error is returned
    /// here; `PipelineError` values can be recovered with `downcast_ref`.
    pub async fn finish(self) -> Result<PipelineSummary> {
        let BatchStream {
            rx, task, cancel, ..
        } = self;
        // The producer may be parked on the inflight budget, which closing
        // `rx` alone does not wake.
        cancel.cancel();
        drop(rx);
        task.await?
    }
}

/// One visit's outcome, sent from a worker to the assembler.
struct Visit {
    slot: usize,
    position: usize,
    outcome: std::result::Result<Vec<Patch>, AugmentationError>,
}

enum Flow {
    Continue,
    Stop,
}

#[derive(Clone)]
pub struct Pipeline {
    caps: RuntimeCaps,
    metrics: Arc<RuntimeMetrics>,
    inflight_sem: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(caps: RuntimeCaps) -> Self {
        let max_units = caps.max_inflight_bytes.div_ceil(PERMIT_UNIT_BYTES).max(1);
        let max = usize::try_from(max_units)
            .unwrap_or(usize::MAX)
            .min(Semaphore::MAX_PERMITS);
        Self {
            caps,
            metrics: Arc::new(RuntimeMetrics::default()),
            inflight_sem: Arc::new(Semaphore::new(max)),
        }
    }

    pub fn caps(&self) -> RuntimeCaps {
        self.caps
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        self.metrics.clone()
    }

    /// Spawn the producer and return the consumer end.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_stream<S: PatchSource>(&self, source: Arc<S>, plan: EpochPlan) -> Result<BatchStream> {
        anyhow::ensure!(plan.mb_size > 0, "mb_size must be positive");
        anyhow::ensure!(!source.is_empty(), "patch source has no examples");

        let (tx, rx) = mpsc::channel::<StreamEvent>(self.caps.max_queue_batches.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = CancelHandle {
            tx: Arc::new(cancel_tx),
        };

        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.produce(source, plan, tx, cancel_rx).await });
        Ok(BatchStream {
            rx,
            cancel,
            metrics: self.metrics.clone(),
            task,
        })
    }

    /// Drive a whole run into a synchronous sink.
    pub async fn run_to_sink<S: PatchSource, K: Sink>(
        &self,
        source: Arc<S>,
        plan: EpochPlan,
        sink: Arc<K>,
    ) -> Result<PipelineSummary> {
        let mut stream = self.spawn_stream(source, plan)?;
        while let Some(event) = stream.next().await {
            let sink = sink.clone();
            let delivered = match event {
                StreamEvent::Batch(lease) => {
                    // The lease moves into the blocking task so its permit is
                    // released only after delivery.
                    tokio::task::spawn_blocking(move || {
                        let res = sink.deliver(&lease.batch);
                        drop(lease);
                        res
                    })
                    .await
                }
                StreamEvent::EpochComplete(summary) => {
                    tokio::task::spawn_blocking(move || sink.epoch_complete(&summary)).await
                }
            };
            if let Err(err) = delivered.map_err(anyhow::Error::from).and_then(|res| res) {
                stream.cancel_handle().cancel();
                let _ = stream.finish().await;
                return Err(err);
            }
        }
        stream.finish().await
    }

    async fn produce<S: PatchSource>(
        &self,
        source: Arc<S>,
        plan: EpochPlan,
        tx: mpsc::Sender<StreamEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PipelineSummary> {
        let mut summary = PipelineSummary::default();
        for epoch in 0..plan.epochs {
            if *cancel.borrow() {
                summary.cancelled = true;
                break;
            }
            match self
                .produce_epoch(&source, plan, epoch, &tx, &mut cancel)
                .await?
            {
                Some(epoch_summary) => summary.epochs.push(epoch_summary),
                None => {
                    summary.cancelled = true;
                    break;
                }
            }
        }
        info!(
            epochs = summary.epochs.len(),
            batches = summary.batches(),
            skipped_draws = summary.skipped_draws(),
            cancelled = summary.cancelled,
            "pipeline finished"
        );
        Ok(summary)
    }

    /// Returns `None` when the epoch was cut short by cancellation or a closed consumer.
    async fn produce_epoch<S: PatchSource>(
        &self,
        source: &Arc<S>,
        plan: EpochPlan,
        epoch: usize,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<EpochSummary>> {
        let order: Arc<[usize]> = visit_order(source.len(), plan, epoch).into();
        let num_workers = self.caps.num_workers.clamp(1, order.len().max(1));
        let per_worker_visits = (self.caps.max_queue_patches
            / num_workers.saturating_mul(source.patches_per_visit().max(1)))
        .max(1);

        let mut workers = JoinSet::new();
        let mut queues = Vec::with_capacity(num_workers);
        for worker in 0..num_workers {
            let (visit_tx, visit_rx) = mpsc::channel::<Visit>(per_worker_visits);
            queues.push(visit_rx);
            workers.spawn(run_worker(
                source.clone(),
                order.clone(),
                worker,
                num_workers,
                worker_seed(plan.seed, worker, epoch),
                visit_tx,
                cancel.clone(),
                self.metrics.clone(),
            ));
        }
        debug!(epoch, num_workers, visits = order.len(), "epoch started");

        let mut summary = EpochSummary {
            epoch,
            visits: order.len(),
            ..EpochSummary::default()
        };
        let mut pending: Vec<Patch> = Vec::with_capacity(plan.mb_size);
        let mut stopped = false;

        // Worker `w` owns slots w, w + n, ...; reading the queues round-robin
        // restores visit order without an unbounded reorder buffer.
        for slot in 0..order.len() {
            let queue = &mut queues[slot % num_workers];
            let visit = tokio::select! {
                biased;
                _ = cancelled(cancel) => None,
                v = queue.recv() => v,
            };
            let Some(visit) = visit else {
                stopped = true;
                break;
            };
            debug_assert_eq!(visit.slot, slot);

            match visit.outcome {
                Ok(patches) => {
                    self.metrics
                        .produced_patches_total
                        .inc_by(patches.len() as u64);
                    pending.extend(patches);
                }
                Err(err) => {
                    summary.skipped_draws += 1;
                    self.metrics.skipped_draws_total.inc();
                    let example_id = source
                        .example_id(visit.position)
                        .map(|id| id.to_string())
                        .unwrap_or_default();
                    warn!(epoch, example_id = %example_id, error = %err, "skipping draw");
                }
            }

            while pending.len() >= plan.mb_size {
                let patches: Vec<Patch> = pending.drain(..plan.mb_size).collect();
                let batch = Batch::from_patches(epoch, summary.batches, &patches)?;
                match self.send_batch(tx, batch, cancel).await? {
                    Flow::Continue => {
                        summary.batches += 1;
                        summary.patches_batched += patches.len();
                    }
                    Flow::Stop => {
                        stopped = true;
                        break;
                    }
                }
            }
            if stopped {
                break;
            }
        }

        // Drain: nothing from this epoch may be in flight before the next shuffle.
        drop(queues);
        while let Some(res) = workers.join_next().await {
            res.map_err(anyhow::Error::from)??;
        }
        if stopped {
            return Ok(None);
        }

        summary.patches_dropped = pending.len();
        self.metrics
            .dropped_patches_total
            .inc_by(summary.patches_dropped as u64);
        self.metrics.epochs_completed_total.inc();
        info!(
            epoch,
            batches = summary.batches,
            patches = summary.patches_batched,
            dropped = summary.patches_dropped,
            skipped_draws = summary.skipped_draws,
            "epoch complete"
        );

        match send_event(tx, StreamEvent::EpochComplete(summary), cancel).await {
            Flow::Continue => Ok(Some(summary)),
            Flow::Stop => Ok(None),
        }
    }

    async fn send_batch(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        batch: Batch,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Flow> {
        let bytes = batch.size_bytes();
        if bytes > self.caps.max_inflight_bytes {
            return Err(PipelineError::resource(format!(
                "batch bytes {} exceeds max_inflight_bytes {}",
                bytes, self.caps.max_inflight_bytes
            ))
            .into());
        }
        let permit_units = bytes.div_ceil(PERMIT_UNIT_BYTES).max(1);
        let permit_units = u32::try_from(permit_units).map_err(|_| {
            PipelineError::resource(format!(
                "batch too large for permit accounting ({permit_units} units)"
            ))
        })?;

        let permit = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Ok(Flow::Stop),
            p = self.inflight_sem.clone().acquire_many_owned(permit_units) => {
                p.map_err(|e| PipelineError::resource(format!("inflight semaphore: {e}")))?
            }
        };
        self.metrics.on_inflight_add(bytes);
        let lease = BatchLease {
            batch,
            bytes,
            metrics: self.metrics.clone(),
            _permit: permit,
        };
        Ok(send_event(tx, StreamEvent::Batch(lease), cancel).await)
    }
}

/// Blocks while the queue is full. A closed consumer counts as cancellation.
async fn send_event(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
    cancel: &mut watch::Receiver<bool>,
) -> Flow {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Flow::Stop,
        res = tx.send(event) => match res {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Stop,
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker<S: PatchSource>(
    source: Arc<S>,
    order: Arc<[usize]>,
    worker: usize,
    num_workers: usize,
    seed: u64,
    tx: mpsc::Sender<Visit>,
    mut cancel: watch::Receiver<bool>,
    metrics: Arc<RuntimeMetrics>,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    for slot in (worker..order.len()).step_by(num_workers) {
        if *cancel.borrow() {
            return Ok(());
        }
        let position = order[slot];
        let src = source.clone();
        let draw_metrics = metrics.clone();
        // Augmentation is CPU-bound; keep it off the async workers.
        let (outcome, returned_rng) = tokio::task::spawn_blocking(move || {
            let _timer = ScopedTimer::new(&draw_metrics.draw_duration);
            let outcome = src.draw(position, &mut rng);
            (outcome, rng)
        })
        .await
        .map_err(anyhow::Error::from)?;
        rng = returned_rng;

        let visit = Visit {
            slot,
            position,
            outcome,
        };
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return Ok(()),
            res = tx.send(visit) => {
                if res.is_err() {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    splitmix64(splitmix64(seed) ^ epoch as u64)
}

/// Seed for worker `worker` in `epoch`. Distinct from the epoch's shuffle seed.
pub fn worker_seed(seed: u64, worker: usize, epoch: usize) -> u64 {
    splitmix64(epoch_seed(seed, epoch) ^ (worker as u64).wrapping_add(1))
}

/// Positions in the order they are visited during `epoch`.
pub fn visit_order(len: usize, plan: EpochPlan, epoch: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if plan.shuffle {
        let mut rng = StdRng::seed_from_u64(epoch_seed(plan.seed, epoch));
        order.shuffle(&mut rng);
    }
    order
}
