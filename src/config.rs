use super::bench::{Iterations, RunConfig};
use super::options::Options;
use super::tune::TuneSpace;
use super::verify::Verify;
use super::Error;
use exec::Properties;
use kernels::TileConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Element types a sweep can run with.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Float,
    Double,
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verify: Verify,
    /// Fixed number of timed iterations. Overrides `min_time`.
    pub iterations: Option<u64>,
    /// Minimum measured time per configuration in seconds.
    pub min_time: f64,
    pub max_iterations: u64,
    pub seed: u64,
    pub scalars: Vec<ScalarKind>,
    pub device: Properties,
    pub tiles: TileConfig,
    pub tune: TuneSpace,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verify: Verify::On,
            iterations: None,
            min_time: 0.5,
            max_iterations: 1000,
            seed: 42,
            scalars: vec![ScalarKind::Float],
            device: Properties::host(),
            tiles: TileConfig::default(),
            tune: TuneSpace::default(),
        }
    }
}

impl Config {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, Error> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let reader = utils::fs::open_readable(path)?;
        let config = Self::from_reader(reader)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the config file if given and apply command line overrides.
    pub fn load(options: &Options) -> Result<Self, Error> {
        let mut config = match options.config {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(verify) = options.verify {
            config.verify = verify;
        }
        if let Some(iterations) = options.iterations {
            config.iterations = Some(iterations);
        }
        if let Some(min_time) = options.min_time {
            config.min_time = min_time;
            config.iterations = None;
        }
        if let Some(seed) = options.seed {
            config.seed = seed;
        }
        if let Some(ref name) = options.device_name {
            config.device.name = name.clone();
        }
        if let Some(compute_units) = options.compute_units {
            config.device.compute_units = compute_units;
        }
        Ok(config)
    }

    pub fn iterations(&self) -> Result<Iterations, Error> {
        match self.iterations {
            Some(iterations) => Ok(Iterations::Fixed(iterations)),
            None => {
                let min_time = Duration::try_from_secs_f64(self.min_time.max(0.0))
                    .map_err(|err| Error::Config(format!("min_time={}: {err}", self.min_time)))?;
                Ok(Iterations::MinTime {
                    min_time,
                    max_iterations: self.max_iterations,
                })
            }
        }
    }

    pub fn run_config(&self) -> Result<RunConfig, Error> {
        Ok(RunConfig {
            verify: self.verify,
            iterations: self.iterations()?,
        })
    }
}
