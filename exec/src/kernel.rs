use super::alloc::DeviceBuffer;
use super::device::Device;
use super::event::Events;
use super::model::Transposition;
use super::Error;
use std::sync::Arc;

/// Arguments of one batched GEMM invocation.
///
/// Computes `C_i = alpha * op(A_i) * op(B_i) + beta * C_i` for every batch
/// item `i`, with column-major operands stored back to back. Consecutive
/// items are `lda * cols(op(A))`, `ldb * cols(op(B))` and `ldc * n`
/// elements apart, where `cols` counts stored columns.
#[derive(Debug)]
pub struct GemmArgs<'a, T> {
    pub transpose_a: Transposition,
    pub transpose_b: Transposition,
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub alpha: T,
    pub a: &'a DeviceBuffer<T>,
    pub lda: usize,
    pub b: &'a DeviceBuffer<T>,
    pub ldb: usize,
    pub beta: T,
    pub c: &'a DeviceBuffer<T>,
    pub ldc: usize,
    pub batch_size: usize,
}

impl<'a, T> GemmArgs<'a, T> {
    /// Same arguments writing into a different output buffer.
    #[must_use]
    pub fn with_output(&self, c: &'a DeviceBuffer<T>) -> Self
    where
        T: Copy,
    {
        Self { c, ..*self }
    }
}

impl<'a, T> Clone for GemmArgs<'a, T>
where
    T: Copy,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for GemmArgs<'a, T> where T: Copy {}

/// A batched GEMM kernel implementation.
///
/// Launching must be repeatable on the same buffers: every call overwrites
/// the output but leaves nothing behind that would skew later invocations.
pub trait BatchedGemm<T> {
    /// Enqueue the kernel and return all completion handles it produced.
    fn launch(&self, device: &Arc<Device>, args: &GemmArgs<'_, T>) -> Result<Events, Error>;

    fn name(&self) -> Option<&str> {
        None
    }
}

impl<T, K> BatchedGemm<T> for &K
where
    K: BatchedGemm<T> + ?Sized,
{
    fn launch(&self, device: &Arc<Device>, args: &GemmArgs<'_, T>) -> Result<Events, Error> {
        (**self).launch(device, args)
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }
}
