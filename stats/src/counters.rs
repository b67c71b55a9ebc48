use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const M: &str = "m";
pub const K: &str = "k";
pub const N: &str = "n";
pub const BATCH_SIZE: &str = "batch_size";
pub const N_FL_OPS: &str = "n_fl_ops";
pub const BYTES_PROCESSED: &str = "bytes_processed";

pub const TOTAL_EVENT_TIME: &str = "total_event_time";
pub const BEST_EVENT_TIME: &str = "best_event_time";
pub const AVG_EVENT_TIME: &str = "avg_event_time";
pub const TOTAL_OVERALL_TIME: &str = "total_overall_time";
pub const BEST_OVERALL_TIME: &str = "best_overall_time";
pub const AVG_OVERALL_TIME: &str = "avg_overall_time";

/// Value of the best time counters before any sample was recorded.
pub const NO_SAMPLE: f64 = u64::MAX as f64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Accumulating,
    Finalized {
        iterations: u64,
    },
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("cannot compute averages over zero iterations")]
    InvalidIterationCount,

    #[error("counters were already finalized after {iterations} iterations")]
    Finalized { iterations: u64 },
}

/// Named benchmark counters.
///
/// Holds static per-configuration numbers (problem size, theoretical
/// flops and bytes) next to the running timing statistics. Times are in
/// nanoseconds.
///
/// Timing statistics go through two states: they accumulate samples until
/// [`Counters::finalize`] derives the averages, after which the counters
/// are read-only.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters {
    values: IndexMap<String, f64>,
    #[serde(skip)]
    state: State,
}

impl Counters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        matches!(self.state, State::Finalized { .. })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, name: &str) -> f64 {
        self.get(name).unwrap_or_default()
    }

    fn ensure_accumulating(&self) -> Result<(), Error> {
        match self.state {
            State::Accumulating => Ok(()),
            State::Finalized { iterations } => Err(Error::Finalized { iterations }),
        }
    }

    /// Reset the timing statistics before a measurement run.
    ///
    /// Best times start at [`NO_SAMPLE`] so the first sample always wins.
    pub fn init(&mut self) -> Result<(), Error> {
        self.ensure_accumulating()?;
        self.set(TOTAL_EVENT_TIME, 0.0);
        self.set(BEST_EVENT_TIME, NO_SAMPLE);
        self.set(TOTAL_OVERALL_TIME, 0.0);
        self.set(BEST_OVERALL_TIME, NO_SAMPLE);
        Ok(())
    }

    /// Record one sample of wall clock (`overall`) and device (`event`) time.
    pub fn update(&mut self, overall: f64, event: f64) -> Result<(), Error> {
        self.ensure_accumulating()?;
        self.set(TOTAL_EVENT_TIME, self.value(TOTAL_EVENT_TIME) + event);
        let best_event = self.get(BEST_EVENT_TIME).unwrap_or(NO_SAMPLE);
        self.set(BEST_EVENT_TIME, best_event.min(event));
        self.set(TOTAL_OVERALL_TIME, self.value(TOTAL_OVERALL_TIME) + overall);
        let best_overall = self.get(BEST_OVERALL_TIME).unwrap_or(NO_SAMPLE);
        self.set(BEST_OVERALL_TIME, best_overall.min(overall));
        Ok(())
    }

    /// Derive per-iteration averages and freeze the counters.
    pub fn finalize(&mut self, iterations: u64) -> Result<(), Error> {
        self.ensure_accumulating()?;
        if iterations == 0 {
            return Err(Error::InvalidIterationCount);
        }
        let count = iterations as f64;
        self.set(AVG_EVENT_TIME, self.value(TOTAL_EVENT_TIME) / count);
        self.set(AVG_OVERALL_TIME, self.value(TOTAL_OVERALL_TIME) / count);
        self.state = State::Finalized { iterations };
        Ok(())
    }

    /// Number of iterations the averages were computed over.
    #[must_use]
    pub fn iterations(&self) -> Option<u64> {
        match self.state {
            State::Finalized { iterations } => Some(iterations),
            State::Accumulating => None,
        }
    }
}

impl<'a> IntoIterator for &'a Counters {
    type Item = (&'a String, &'a f64);
    type IntoIter = indexmap::map::Iter<'a, String, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
