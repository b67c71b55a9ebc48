use super::Error;
use exec::{BatchedGemm, Device, DeviceBuffer, GemmArgs};
use kernels::{reference, Scalar};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether kernel results are checked against the host reference.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
pub enum Verify {
    #[default]
    On,
    Off,
}

impl Verify {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self == Self::On
    }
}

impl std::fmt::Display for Verify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// First element outside the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f64,
    pub actual: f64,
}

/// Compare element-wise within the tolerance of `T`.
///
/// A length difference is reported at the first index present in only
/// one of the vectors, with `NaN` standing in for the missing value.
pub fn compare_vectors<T>(have: &[T], want: &[T]) -> Result<(), Mismatch>
where
    T: Scalar,
{
    let epsilon = T::EPSILON.as_f64();
    let max_relative = T::MAX_RELATIVE.as_f64();
    for (index, (actual, expected)) in have.iter().zip(want).enumerate() {
        let (actual, expected) = (actual.as_f64(), expected.as_f64());
        if !approx::relative_eq!(actual, expected, epsilon = epsilon, max_relative = max_relative) {
            return Err(Mismatch {
                index,
                expected,
                actual,
            });
        }
    }
    if have.len() != want.len() {
        let index = have.len().min(want.len());
        return Err(Mismatch {
            index,
            expected: want.get(index).map_or(f64::NAN, |v| v.as_f64()),
            actual: have.get(index).map_or(f64::NAN, |v| v.as_f64()),
        });
    }
    Ok(())
}

/// Run the kernel once and check its output against the host reference.
///
/// The kernel writes into a scratch output initialized from `c`, so the
/// buffers of the timed loop are left untouched. Any mismatch is fatal
/// and reported as [`Error::VerificationMismatch`].
pub fn verify<T, K>(
    device: &Arc<Device>,
    kernel: &K,
    name: &str,
    args: &GemmArgs<'_, T>,
    a: &[T],
    b: &[T],
    c: &[T],
) -> Result<(), Error>
where
    T: Scalar,
    K: BatchedGemm<T> + ?Sized,
{
    let mut expected = c.to_vec();
    reference::gemm_batched(
        args.transpose_a,
        args.transpose_b,
        args.m,
        args.n,
        args.k,
        args.alpha,
        a,
        args.lda,
        b,
        args.ldb,
        args.beta,
        &mut expected,
        args.ldc,
        args.batch_size,
    );

    let scratch: DeviceBuffer<T> = device.allocate_named(c.len(), Some("c_verify"))?;
    let actual = (|| -> Result<Vec<T>, Error> {
        let upload = device.copy_to_device(c, &scratch, c.len())?;
        device.wait([&upload])?;
        let events = kernel.launch(device, &args.with_output(&scratch))?;
        device.wait(&events)?;
        Ok(device.copy_to_host(&scratch, c.len())?.wait()?)
    })();
    device.deallocate(scratch)?;
    let actual = actual?;

    match compare_vectors(&actual, &expected) {
        Ok(()) => {
            log::debug!("{name}: verified {} elements", expected.len());
            Ok(())
        }
        Err(Mismatch {
            index,
            expected,
            actual,
        }) => {
            log::error!("{name}: element {index} is {actual} but should be {expected}");
            Err(Error::VerificationMismatch {
                name: name.to_string(),
                index,
                expected,
                actual,
            })
        }
    }
}
