#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_arguments
)]

pub mod gemm_batched;
pub mod reference;

pub use gemm_batched::{GemmBatched, TileConfig};

/// Element type of the GEMM benchmarks.
pub trait Scalar:
    num_traits::Float
    + std::ops::AddAssign
    + Default
    + Send
    + Sync
    + std::fmt::Debug
    + std::fmt::Display
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
    /// Type name used in benchmark names.
    const NAME: &'static str;

    /// Absolute tolerance when comparing against the reference.
    const EPSILON: Self;

    /// Relative tolerance when comparing against the reference.
    const MAX_RELATIVE: Self;

    fn from_f64(value: f64) -> Self;

    fn as_f64(self) -> f64;
}

impl Scalar for f32 {
    const NAME: &'static str = "float";
    const EPSILON: Self = 1e-3;
    const MAX_RELATIVE: Self = 1e-3;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Scalar for f64 {
    const NAME: &'static str = "double";
    const EPSILON: Self = 1e-9;
    const MAX_RELATIVE: Self = 1e-9;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}
