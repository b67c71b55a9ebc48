#![allow(
    clippy::too_many_arguments,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]

pub mod bench;
pub mod config;
pub mod data;
pub mod options;
pub mod range;
pub mod report;
pub mod timing;
pub mod tune;
pub mod verify;

pub use exec;
pub use kernels;
pub use stats;

/// Exit status of a run aborted by a kernel producing wrong results.
pub const VERIFICATION_EXIT_CODE: i32 = 2;

#[must_use]
pub fn is_debug() -> bool {
    #[cfg(all(feature = "debug_build", feature = "release_build"))]
    compile_error!(r#"both feature "debug_build" or "release_build" are set."#);

    #[cfg(feature = "debug_build")]
    return true;
    #[cfg(feature = "release_build")]
    return false;
    #[cfg(not(any(feature = "debug_build", feature = "release_build")))]
    compile_error!(r#"neither feature "debug_build" or "release_build" is set."#);
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] exec::Error),

    #[error(transparent)]
    Counters(#[from] stats::Error),

    #[error("invalid parameters{}: {reason}", .row.map(|row| format!(" in row {row}")).unwrap_or_default())]
    InvalidParams { row: Option<usize>, reason: String },

    #[error("{name}: verification failed at element {index}: expected {expected} but got {actual}")]
    VerificationMismatch {
        name: String,
        index: usize,
        expected: f64,
        actual: f64,
    },

    #[error("none of the {failed} benchmark configurations succeeded")]
    NoSuccessfulRuns { failed: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no kernel configuration fits the device")]
    EmptyTuneSpace,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fs(#[from] utils::fs::Error),
}

impl Error {
    /// Process exit status for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::VerificationMismatch { .. } => VERIFICATION_EXIT_CODE,
            _ => 1,
        }
    }

    /// Whether the error only invalidates the current parameter tuple.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Device(err) => err.is_recoverable(),
            _ => false,
        }
    }
}

#[cfg(test)]
pub mod tests {
    static INIT: std::sync::Once = std::sync::Once::new();

    pub fn init_test() {
        INIT.call_once(|| {
            env_logger::builder().is_test(true).init();
            color_eyre::install().unwrap();
        });
    }

    #[test]
    fn only_verification_mismatch_exits_with_dedicated_code() {
        use super::{Error, VERIFICATION_EXIT_CODE};
        let mismatch = Error::VerificationMismatch {
            name: "BM_GemmBatched<float>/n/n/8/8/8/1".to_string(),
            index: 3,
            expected: 1.0,
            actual: 2.0,
        };
        assert_eq!(mismatch.exit_code(), VERIFICATION_EXIT_CODE);
        assert_ne!(VERIFICATION_EXIT_CODE, 0);
        assert!(!mismatch.is_recoverable());

        let allocation = Error::Device(exec::Error::Allocation {
            requested: u64::MAX,
            available: 0,
        });
        assert_eq!(allocation.exit_code(), 1);
        assert!(allocation.is_recoverable());
        assert_eq!(Error::Config("min_time".to_string()).exit_code(), 1);
    }
}
