use rayon::prelude::*;
use tracing::{debug, info, info_span};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub parallel: bool,
    pub max_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig { parallel: false, max_workers: 4 }
    }
}

/// Runs `f` over every chunk yielded by `chunks`, combining the per-chunk
/// outputs with `combine`. `reference` is read-only reference data shared
/// across every invocation; `Ref: Sync` is required so the type system (not
/// just documentation) rules out mutation races in parallel mode.
///
/// `cancel` is polled at every chunk boundary; the run stops (without error)
/// as soon as it returns `true`, returning whatever has combined so far.
pub fn run_streaming<C, R, Ref, F, Combine>(
    chunks: impl Iterator<Item = C>,
    reference: &Ref,
    cfg: &ExecutorConfig,
    cancel: &dyn Fn() -> bool,
    f: F,
    combine: Combine,
) -> EngineResult<Vec<R>>
where
    C: Send,
    R: Send,
    Ref: Sync,
    F: Fn(C, &Ref, usize) -> EngineResult<Vec<R>> + Sync,
    Combine: FnOnce(Vec<Vec<R>>) -> Vec<R>,
{
    let span = info_span!("streaming_executor", parallel = cfg.parallel, max_workers = cfg.max_workers);
    let _guard = span.enter();

    let outputs = if cfg.parallel {
        run_parallel(chunks, reference, cfg, cancel, &f)?
    } else {
        run_serial(chunks, reference, cancel, &f)?
    };
    Ok(combine(outputs))
}

fn run_serial<C, R, Ref, F>(
    chunks: impl Iterator<Item = C>,
    reference: &Ref,
    cancel: &dyn Fn() -> bool,
    f: &F,
) -> EngineResult<Vec<Vec<R>>>
where
    F: Fn(C, &Ref, usize) -> EngineResult<Vec<R>>,
{
    info!("using serial chunk processing (bounded memory)");
    let mut outputs = Vec::new();
    let mut total_rows = 0usize;

    for (index, chunk) in chunks.enumerate() {
        if cancel() {
            return Err(EngineError::Cancelled { completed: index, total: index });
        }
        debug!(chunk = index, "processing chunk");
        let result = f(chunk, reference, index).map_err(|e| EngineError::ChunkFailed {
            index,
            source: Box::new(e),
        })?;
        total_rows += result.len();
        if !result.is_empty() {
            outputs.push(result);
        }
        // `chunk` is dropped here, before the next one is pulled.
    }
    info!(chunks = outputs.len(), total_rows, "all chunks processed (serial)");
    Ok(outputs)
}

fn run_parallel<C, R, Ref, F>(
    chunks: impl Iterator<Item = C>,
    reference: &Ref,
    cfg: &ExecutorConfig,
    cancel: &dyn Fn() -> bool,
    f: &F,
) -> EngineResult<Vec<Vec<R>>>
where
    C: Send,
    R: Send,
    Ref: Sync,
    F: Fn(C, &Ref, usize) -> EngineResult<Vec<R>> + Sync,
{
    info!(max_workers = cfg.max_workers, "using parallel chunk processing");
    // Parallel dispatch requires materializing the sequence first: rayon
    // schedules over a slice, not a lazy iterator.
    let materialized: Vec<C> = chunks.collect();
    info!(chunks = materialized.len(), "collected chunks for parallel processing");

    if cancel() {
        return Err(EngineError::Cancelled { completed: 0, total: materialized.len() });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.max_workers)
        .build()
        .map_err(|e| EngineError::PoolBuild(e.to_string()))?;

    let results: Vec<EngineResult<Vec<R>>> = pool.install(|| {
        materialized
            .into_par_iter()
            .enumerate()
            .map(|(index, chunk)| {
                f(chunk, reference, index).map_err(|e| EngineError::ChunkFailed {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    });

    let mut outputs = Vec::with_capacity(results.len());
    for result in results {
        outputs.push(result?);
    }
    info!(chunks = outputs.len(), "all chunks processed (parallel)");
    Ok(outputs)
}

/// A transactional destination for incrementally-written rows. Exactly one
/// transaction is open between `begin` and `commit`/`rollback`; parallel
/// dispatch is disallowed in the incremental path for this reason (see
/// `run_streaming_incremental`, which takes no worker-count parameter).
pub trait SummarySink<R> {
    fn begin(&mut self) -> EngineResult<()>;
    fn write(&mut self, rows: &[R]) -> EngineResult<()>;
    fn commit(&mut self) -> EngineResult<()>;
    fn rollback(&mut self) -> EngineResult<()>;
}

pub fn run_streaming_incremental<C, R, Ref, F, S>(
    chunks: impl Iterator<Item = C>,
    reference: &Ref,
    cancel: &dyn Fn() -> bool,
    f: F,
    sink: &mut S,
) -> EngineResult<()>
where
    F: Fn(C, &Ref, usize) -> EngineResult<Vec<R>>,
    S: SummarySink<R>,
{
    sink.begin()?;
    for (index, chunk) in chunks.enumerate() {
        if cancel() {
            sink.rollback()?;
            return Err(EngineError::Cancelled { completed: index, total: index });
        }
        match f(chunk, reference, index) {
            Ok(rows) => {
                if let Err(e) = sink.write(&rows) {
                    let _ = sink.rollback();
                    return Err(e);
                }
            }
            Err(e) => {
                let _ = sink.rollback();
                return Err(EngineError::ChunkFailed { index, source: Box::new(e) });
            }
        }
    }
    sink.commit()
}
