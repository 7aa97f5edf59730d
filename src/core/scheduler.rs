use crate::core::interpolation::{InterpolationEngine, WeatherBatch};
use crate::core::resources::{ExecutionPlan, ResourceController};
use crate::types::{GridError, GridResult, MethodCounts};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coarse run cancellation, checked before each batch starts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Destination for completed batches. Implementations are the single writer.
pub trait WeatherSink {
    /// Persist one batch; returns the number of rows written
    fn commit_weather(&mut self, batch: WeatherBatch) -> GridResult<usize>;
}

/// Totals for one interpolation run
#[derive(Debug, Clone, Default)]
pub struct InterpolationSummary {
    pub batches_committed: usize,
    pub dates_processed: usize,
    pub rows_written: usize,
    pub method_counts: MethodCounts,
    pub plans_used: Vec<ExecutionPlan>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl InterpolationSummary {
    fn record(&mut self, dates: usize, rows: usize, counts: &MethodCounts) {
        self.batches_committed += 1;
        self.dates_processed += dates;
        self.rows_written += rows;
        for (method, count) in counts {
            *self.method_counts.entry(*method).or_insert(0) += count;
        }
    }

    fn record_plan(&mut self, plan: ExecutionPlan) {
        if self.plans_used.last() != Some(&plan) {
            self.plans_used.push(plan);
        }
    }
}

/// Dispatches date batches to a bounded worker pool and commits results
/// through a single writer
pub struct BatchScheduler {
    engine: Arc<InterpolationEngine>,
}

impl BatchScheduler {
    pub fn new(engine: Arc<InterpolationEngine>) -> Self {
        Self { engine }
    }

    /// Interpolate every date in `dates` and commit the results to `sink`.
    ///
    /// The resource controller is consulted before each dispatch window.
    /// Cancellation skips batches that have not started; batches already
    /// running finish and are committed.
    pub fn run<S: WeatherSink>(
        &self,
        dates: &[NaiveDate],
        controller: &mut ResourceController,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> GridResult<InterpolationSummary> {
        let mut seen = HashSet::with_capacity(dates.len());
        if let Some(dup) = dates.iter().find(|d| !seen.insert(**d)) {
            return Err(GridError::Config(format!("date {} scheduled more than once", dup)));
        }

        log::info!(
            "🌦️  Interpolating {} dates over {} cells",
            dates.len(),
            self.engine.cell_count()
        );
        let start = Instant::now();
        let mut summary = InterpolationSummary::default();
        let mut pool: Option<(usize, rayon::ThreadPool)> = None;
        let mut remaining = dates;
        let mut next_index = 0usize;

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let plan = controller.plan();
            summary.record_plan(plan);

            let window = controller.reconsult_every().max(plan.parallelism);
            let mut wave = Vec::with_capacity(window);
            while wave.len() < window && !remaining.is_empty() {
                let take = plan.batch_size.max(1).min(remaining.len());
                wave.push((next_index, remaining[..take].to_vec()));
                remaining = &remaining[take..];
                next_index += 1;
            }

            let parallel = cfg!(feature = "parallel") && !plan.is_sequential();
            if parallel {
                // Rebuilt only when the plan changes worker count
                if pool.as_ref().map(|(n, _)| *n) != Some(plan.parallelism) {
                    pool = Some((plan.parallelism, build_pool(plan.parallelism)?));
                }
                if let Some((_, workers)) = &pool {
                    self.dispatch_parallel(workers, plan.parallelism, wave, sink, cancel, &mut summary)?;
                }
            } else {
                self.dispatch_sequential(wave, sink, cancel, &mut summary)?;
            }
        }

        if cancel.is_cancelled() && summary.dates_processed < dates.len() {
            summary.cancelled = true;
        }
        summary.elapsed = start.elapsed();

        if summary.cancelled {
            log::warn!(
                "Interpolation cancelled after {} of {} dates ({} batches)",
                summary.dates_processed,
                dates.len(),
                summary.batches_committed
            );
        } else {
            log::info!(
                "✅ Interpolation completed: {} rows in {} batches ({:?})",
                summary.rows_written,
                summary.batches_committed,
                summary.elapsed
            );
        }
        Ok(summary)
    }

    fn dispatch_sequential<S: WeatherSink>(
        &self,
        wave: Vec<(usize, Vec<NaiveDate>)>,
        sink: &mut S,
        cancel: &CancellationToken,
        summary: &mut InterpolationSummary,
    ) -> GridResult<()> {
        for (index, dates) in wave {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }
            let batch = self.engine.interpolate_batch(index, &dates);
            commit(sink, batch, summary)?;
        }
        Ok(())
    }

    fn dispatch_parallel<S: WeatherSink>(
        &self,
        pool: &rayon::ThreadPool,
        parallelism: usize,
        wave: Vec<(usize, Vec<NaiveDate>)>,
        sink: &mut S,
        cancel: &CancellationToken,
        summary: &mut InterpolationSummary,
    ) -> GridResult<()> {
        // Bounded so finished batches wait for the writer instead of piling up
        let (tx, rx) = crossbeam_channel::bounded::<WeatherBatch>(parallelism);
        let halt = CancellationToken::new();

        for (index, dates) in wave {
            let tx = tx.clone();
            let engine = Arc::clone(&self.engine);
            let cancel = cancel.clone();
            let halt = halt.clone();
            pool.spawn(move || {
                if cancel.is_cancelled() || halt.is_cancelled() {
                    return;
                }
                let batch = engine.interpolate_batch(index, &dates);
                // The receiver outlives every sender; a failed send means the writer stopped
                let _ = tx.send(batch);
            });
        }
        drop(tx);

        let mut failure = None;
        for batch in rx {
            if failure.is_some() {
                continue;
            }
            if let Err(e) = commit(sink, batch, summary) {
                halt.cancel();
                failure = Some(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn build_pool(threads: usize) -> GridResult<rayon::ThreadPool> {
    log::debug!("Building worker pool with {} threads", threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("firegrid-worker-{}", i))
        .build()
        .map_err(|e| GridError::Processing(format!("failed to build worker pool: {}", e)))
}

fn commit<S: WeatherSink>(
    sink: &mut S,
    batch: WeatherBatch,
    summary: &mut InterpolationSummary,
) -> GridResult<()> {
    let index = batch.index;
    let dates = batch.dates.len();
    let counts = batch.counts.clone();
    let rows = sink.commit_weather(batch)?;
    summary.record(dates, rows, &counts);
    log::debug!("Committed batch {} ({} rows)", index, rows);
    Ok(())
}
