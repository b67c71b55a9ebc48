use super::data::{const_data, DataGenerator};
use super::range::GemmBatchedParams;
use super::timing::{self, Stopwatch};
use super::verify::{self, Verify};
use super::Error;
use exec::{BatchedGemm, Device, DeviceBuffer, GemmArgs, Transposition};
use kernels::Scalar;
use serde::{Deserialize, Serialize};
use stats::counters::{self, Counters};
use std::sync::Arc;
use std::time::Duration;

/// Leading dimensions `(lda, ldb, ldc)` of densely stored operands.
#[must_use]
pub fn leading_dims(
    transpose_a: Transposition,
    transpose_b: Transposition,
    m: usize,
    k: usize,
    n: usize,
) -> (usize, usize, usize) {
    let lda = if transpose_a == Transposition::Normal { m } else { k };
    let ldb = if transpose_b == Transposition::Normal { k } else { n };
    (lda, ldb, m)
}

/// Problem size and theoretical work of one configuration.
///
/// Every batch item costs `2mnk` flops for the products plus `3mn` for
/// scaling by alpha and beta and accumulating into `C`, and moves `A`,
/// `B` and `C` in plus `C` out. With `beta == 0` the beta term is dropped
/// and `C` is never read.
#[must_use]
pub fn static_counters<T>(params: &GemmBatchedParams<T>) -> Counters
where
    T: Scalar,
{
    let m = params.m() as f64;
    let k = params.k() as f64;
    let n = params.n() as f64;
    let batch_size = params.batch_size() as f64;
    let elem_size = std::mem::size_of::<T>() as f64;

    let mut n_fl_ops = (2.0 * m * n * k + 3.0 * m * n) * batch_size;
    let mut bytes_processed = (m * k + k * n + 2.0 * m * n) * batch_size * elem_size;
    if params.beta().is_zero() {
        n_fl_ops -= 3.0 * m * n * batch_size;
        bytes_processed -= m * n * batch_size * elem_size;
    }

    let mut counters = Counters::new();
    counters.set(counters::M, m);
    counters.set(counters::K, k);
    counters.set(counters::N, n);
    counters.set(counters::BATCH_SIZE, batch_size);
    counters.set(counters::N_FL_OPS, n_fl_ops);
    counters.set(counters::BYTES_PROCESSED, bytes_processed);
    counters
}

#[must_use]
pub fn benchmark_name<T>(params: &GemmBatchedParams<T>) -> String
where
    T: Scalar,
{
    format!("BM_GemmBatched<{}>/{params}", T::NAME)
}

/// How many timed iterations to run per configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Fixed(u64),
    /// Iterate until the harness clock reached `min_time`.
    MinTime {
        min_time: Duration,
        max_iterations: u64,
    },
}

impl Default for Iterations {
    fn default() -> Self {
        Self::MinTime {
            min_time: Duration::from_millis(500),
            max_iterations: 1000,
        }
    }
}

impl Iterations {
    #[must_use]
    pub fn should_continue(&self, completed: u64, elapsed: Duration) -> bool {
        match *self {
            Self::Fixed(iterations) => completed < iterations,
            Self::MinTime {
                min_time,
                max_iterations,
            } => completed == 0 || (elapsed < min_time && completed < max_iterations),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub verify: Verify,
    pub iterations: Iterations,
}

/// Parameter tuple as reported, independent of the element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsRecord {
    pub t_a: String,
    pub t_b: String,
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub alpha: f64,
    pub beta: f64,
    pub batch_size: usize,
}

impl<T> From<&GemmBatchedParams<T>> for ParamsRecord
where
    T: Scalar,
{
    fn from(params: &GemmBatchedParams<T>) -> Self {
        Self {
            t_a: params.t_a().to_string(),
            t_b: params.t_b().to_string(),
            m: params.m(),
            k: params.k(),
            n: params.n(),
            alpha: params.alpha().as_f64(),
            beta: params.beta().as_f64(),
            batch_size: params.batch_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchResult {
    pub name: String,
    pub scalar: String,
    pub params: ParamsRecord,
    pub counters: Counters,
}

/// Device buffers released when dropped, on success and error paths alike.
struct Allocated<'d, T> {
    device: &'d Device,
    buffers: Vec<DeviceBuffer<T>>,
}

impl<'d, T> Allocated<'d, T>
where
    T: Scalar,
{
    fn new(device: &'d Device) -> Self {
        Self {
            device,
            buffers: Vec::new(),
        }
    }

    fn allocate(&mut self, name: &str, len: usize) -> Result<DeviceBuffer<T>, Error> {
        let buffer: DeviceBuffer<T> = self.device.allocate_named(len, Some(name))?;
        self.buffers.push(buffer.clone());
        Ok(buffer)
    }
}

impl<'d, T> Drop for Allocated<'d, T> {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::warn!("failed to drain device queue: {err}");
        }
        for buffer in self.buffers.drain(..) {
            if let Err(err) = self.device.deallocate(buffer) {
                log::warn!("failed to release device buffer: {err}");
            }
        }
    }
}

/// Measure one parameter tuple.
///
/// Reserves the device buffers, uploads random inputs, optionally
/// verifies the kernel once, runs one unmeasured warmup and then the timed
/// loop. Counters are only updated while the harness clock is paused.
///
/// Host inputs are generated only once the device accepted the buffer
/// sizes, so an oversized tuple fails with an allocation error.
pub fn run<T, K>(
    device: &Arc<Device>,
    kernel: &K,
    params: &GemmBatchedParams<T>,
    config: &RunConfig,
    data: &mut DataGenerator,
) -> Result<BenchResult, Error>
where
    T: Scalar,
    K: BatchedGemm<T> + ?Sized,
{
    let name = benchmark_name(params);
    let (transpose_a, transpose_b) = (params.transpose_a(), params.transpose_b());
    let (m, k, n, batch_size) = (params.m(), params.k(), params.n(), params.batch_size());
    let (lda, ldb, ldc) = leading_dims(transpose_a, transpose_b, m, k, n);
    let mut counters = static_counters(params);

    // element counts cannot overflow, `GemmBatchedParams::new` checked them
    let (len_a, len_b, len_c) = (m * k * batch_size, k * n * batch_size, m * n * batch_size);
    let mut buffers = Allocated::new(device);
    let dev_a = buffers.allocate("a", len_a)?;
    let dev_b = buffers.allocate("b", len_b)?;
    let dev_c = buffers.allocate("c", len_c)?;

    let a: Vec<T> = data.random(len_a);
    let b: Vec<T> = data.random(len_b);
    let c: Vec<T> = const_data(len_c, T::zero());
    let uploads = [
        device.copy_to_device(&a, &dev_a, len_a)?,
        device.copy_to_device(&b, &dev_b, len_b)?,
        device.copy_to_device(&c, &dev_c, len_c)?,
    ];
    device.wait(&uploads)?;

    let args = GemmArgs {
        transpose_a,
        transpose_b,
        m,
        k,
        n,
        alpha: params.alpha(),
        a: &dev_a,
        lda,
        b: &dev_b,
        ldb,
        beta: params.beta(),
        c: &dev_c,
        ldc,
        batch_size,
    };

    if config.verify.is_enabled() {
        verify::verify(device, kernel, &name, &args, &a, &b, &c)?;
    }

    let invoke = || -> Result<exec::Events, Error> {
        let events = kernel.launch(device, &args)?;
        device.wait(&events)?;
        Ok(events)
    };

    invoke()?;
    device.wait_idle()?;

    counters.init()?;
    let mut stopwatch = Stopwatch::start();
    let mut iterations = 0;
    while config
        .iterations
        .should_continue(iterations, stopwatch.elapsed())
    {
        let times = timing::timef(&invoke)?;
        stopwatch.paused(|| counters.update(times.overall, times.event))?;
        iterations += 1;
    }
    counters.finalize(iterations)?;

    log::debug!(
        "{name}: {iterations} iterations in {:?}, avg event time {:.0}ns",
        stopwatch.elapsed(),
        counters.get(counters::AVG_EVENT_TIME).unwrap_or_default(),
    );

    Ok(BenchResult {
        name,
        scalar: T::NAME.to_string(),
        params: params.into(),
        counters,
    })
}

/// A parameter tuple that was not measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub results: Vec<BenchResult>,
    pub skipped: Vec<Skipped>,
}

impl SweepReport {
    pub fn extend(&mut self, other: Self) {
        self.results.extend(other.results);
        self.skipped.extend(other.skipped);
    }
}

/// Measure every tuple of a lazy parameter sequence.
///
/// Rejected tuples and tuples failing with an allocation error or device
/// fault are skipped. A verification mismatch or any other error aborts
/// the sweep.
pub fn run_sweep<T, K, P>(
    device: &Arc<Device>,
    kernel: &K,
    params: P,
    config: &RunConfig,
    data: &mut DataGenerator,
) -> Result<SweepReport, Error>
where
    T: Scalar,
    K: BatchedGemm<T> + ?Sized,
    P: IntoIterator<Item = Result<GemmBatchedParams<T>, Error>>,
{
    let mut report = SweepReport::default();
    for params in params {
        let params = match params {
            Ok(params) => params,
            Err(err @ Error::InvalidParams { .. }) => {
                log::warn!("skipping: {err}");
                report.skipped.push(Skipped {
                    name: format!("BM_GemmBatched<{}>", T::NAME),
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        let name = benchmark_name(&params);
        log::info!("running {name}");
        match run(device, kernel, &params, config, data) {
            Ok(result) => report.results.push(result),
            Err(err) if err.is_recoverable() => {
                log::warn!("skipping {name}: {err}");
                report.skipped.push(Skipped {
                    name,
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    if report.results.is_empty() && !report.skipped.is_empty() {
        return Err(Error::NoSuccessfulRuns {
            failed: report.skipped.len(),
        });
    }
    Ok(report)
}
