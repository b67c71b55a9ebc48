use super::bench::{self, BenchResult, RunConfig, Skipped};
use super::data::DataGenerator;
use super::range::GemmBatchedParams;
use super::Error;
use exec::Device;
use kernels::{GemmBatched, Scalar, TileConfig};
use serde::{Deserialize, Serialize};
use stats::counters;
use std::sync::Arc;

/// Candidate values of every tiling parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneSpace {
    pub tile_m: Vec<usize>,
    pub tile_n: Vec<usize>,
    pub tile_k: Vec<usize>,
    pub batches_per_launch: Vec<usize>,
}

impl Default for TuneSpace {
    fn default() -> Self {
        Self {
            tile_m: vec![4, 8, 16, 32],
            tile_n: vec![4, 8, 16, 32],
            tile_k: vec![4, 8, 16],
            batches_per_launch: vec![1, 4],
        }
    }
}

impl TuneSpace {
    /// Configurations of the space that fit the device.
    ///
    /// A configuration fits when its `A` and `B` tiles fit into local memory
    /// (if the device has any) and one output tile fits into a work group.
    #[must_use]
    pub fn configs<T>(&self, device: &Device) -> Vec<TileConfig>
    where
        T: Scalar,
    {
        itertools::iproduct!(
            self.tile_m.iter().copied(),
            self.tile_n.iter().copied(),
            self.tile_k.iter().copied(),
            self.batches_per_launch.iter().copied()
        )
        .map(|(tile_m, tile_n, tile_k, batches_per_launch)| TileConfig {
            tile_m,
            tile_n,
            tile_k,
            batches_per_launch,
        })
        .filter(|config| {
            let fits_local_memory = !device.has_local_memory()
                || config.local_memory_bytes::<T>() <= device.local_memory_bytes();
            let fits_work_group = config.work_items() <= device.work_group_size();
            if !(fits_local_memory && fits_work_group) {
                log::trace!("{config} does not fit {}", device.name());
            }
            fits_local_memory && fits_work_group
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneEntry {
    pub config: TileConfig,
    pub result: BenchResult,
}

impl TuneEntry {
    #[must_use]
    pub fn avg_event_time(&self) -> f64 {
        self.result
            .counters
            .get(counters::AVG_EVENT_TIME)
            .unwrap_or(f64::INFINITY)
    }
}

/// Measured configurations, fastest first.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneReport {
    pub entries: Vec<TuneEntry>,
    pub skipped: Vec<Skipped>,
}

impl TuneReport {
    #[must_use]
    pub fn best(&self) -> Option<&TuneEntry> {
        self.entries.first()
    }
}

/// Measure every fitting configuration on the same inputs.
pub fn tune<T>(
    device: &Arc<Device>,
    params: &GemmBatchedParams<T>,
    space: &TuneSpace,
    config: &RunConfig,
    seed: u64,
) -> Result<TuneReport, Error>
where
    T: Scalar,
{
    let candidates = space.configs::<T>(device);
    if candidates.is_empty() {
        return Err(Error::EmptyTuneSpace);
    }
    log::info!(
        "tuning {} over {} configurations",
        bench::benchmark_name(params),
        candidates.len()
    );

    let mut report = TuneReport::default();
    for tiles in candidates {
        let kernel = GemmBatched::new(tiles);
        let mut data = DataGenerator::from_seed(seed);
        match bench::run(device, &kernel, params, config, &mut data) {
            Ok(result) => {
                report.entries.push(TuneEntry {
                    config: tiles,
                    result,
                });
            }
            Err(err) if err.is_recoverable() => {
                log::warn!("skipping {tiles}: {err}");
                report.skipped.push(Skipped {
                    name: tiles.to_string(),
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    if report.entries.is_empty() {
        return Err(Error::NoSuccessfulRuns {
            failed: report.skipped.len(),
        });
    }
    report
        .entries
        .sort_by(|a, b| a.avg_event_time().total_cmp(&b.avg_event_time()));
    Ok(report)
}
