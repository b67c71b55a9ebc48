use super::reference::{batch_strides, min_leading_dim};
use super::Scalar;
use exec::{BatchedGemm, Device, DeviceBuffer, Error, Events, GemmArgs, Transposition};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Blocking parameters of the batched GEMM kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    pub tile_m: usize,
    pub tile_n: usize,
    pub tile_k: usize,
    /// Batch items processed by a single device launch.
    pub batches_per_launch: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_m: 16,
            tile_n: 16,
            tile_k: 16,
            batches_per_launch: 1,
        }
    }
}

impl std::fmt::Display for TileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}x{}/b{}",
            self.tile_m, self.tile_n, self.tile_k, self.batches_per_launch
        )
    }
}

impl TileConfig {
    /// Bytes of local memory holding one `A` and one `B` tile.
    #[must_use]
    pub fn local_memory_bytes<T>(&self) -> usize {
        (self.tile_m * self.tile_k + self.tile_k * self.tile_n) * std::mem::size_of::<T>()
    }

    /// Work items of one output tile.
    #[must_use]
    pub fn work_items(&self) -> usize {
        self.tile_m * self.tile_n
    }

    fn validate(&self) -> Result<(), String> {
        if self.tile_m == 0 || self.tile_n == 0 || self.tile_k == 0 {
            return Err(format!("invalid tile configuration {self}"));
        }
        Ok(())
    }
}

/// Blocked batched GEMM.
///
/// Every batch item is split into `tile_m x tile_n` output tiles. Columns
/// of tiles run in parallel on the compute units of the device, each
/// accumulating over `tile_k` deep slices of `A` and `B` in ascending `k`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GemmBatched {
    pub config: TileConfig,
}

impl GemmBatched {
    #[must_use]
    pub fn new(config: TileConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Clone, Copy)]
struct Shape<T> {
    transpose_a: Transposition,
    transpose_b: Transposition,
    m: usize,
    k: usize,
    n: usize,
    alpha: T,
    lda: usize,
    ldb: usize,
    beta: T,
    ldc: usize,
}

impl<T> Shape<T>
where
    T: Scalar,
{
    fn op_a(&self, a: &[T], i: usize, l: usize) -> T {
        if self.transpose_a.is_transposed() {
            a[l + i * self.lda]
        } else {
            a[i + l * self.lda]
        }
    }

    fn op_b(&self, b: &[T], l: usize, j: usize) -> T {
        if self.transpose_b.is_transposed() {
            b[j + l * self.ldb]
        } else {
            b[l + j * self.ldb]
        }
    }

    /// Compute the output columns `first_col..` held by `c`.
    fn columns(&self, config: &TileConfig, a: &[T], b: &[T], c: &mut [T], first_col: usize) {
        let num_cols = c.len() / self.ldc;
        let mut a_tile = vec![T::zero(); config.tile_m * config.tile_k];
        let mut b_tile = vec![T::zero(); config.tile_k * num_cols];
        let mut acc = vec![T::zero(); config.tile_m * num_cols];

        for i0 in (0..self.m).step_by(config.tile_m) {
            let rows = config.tile_m.min(self.m - i0);
            acc.fill(T::zero());

            for l0 in (0..self.k).step_by(config.tile_k) {
                let depth = config.tile_k.min(self.k - l0);
                for ll in 0..depth {
                    for ii in 0..rows {
                        a_tile[ii + ll * rows] = self.op_a(a, i0 + ii, l0 + ll);
                    }
                }
                for jj in 0..num_cols {
                    for ll in 0..depth {
                        b_tile[ll + jj * depth] = self.op_b(b, l0 + ll, first_col + jj);
                    }
                }
                for jj in 0..num_cols {
                    for ii in 0..rows {
                        let sum = &mut acc[ii + jj * rows];
                        for ll in 0..depth {
                            *sum += a_tile[ii + ll * rows] * b_tile[ll + jj * depth];
                        }
                    }
                }
            }

            for jj in 0..num_cols {
                for ii in 0..rows {
                    let out = &mut c[i0 + ii + jj * self.ldc];
                    let scaled = self.alpha * acc[ii + jj * rows];
                    *out = if self.beta.is_zero() {
                        scaled
                    } else {
                        scaled + self.beta * *out
                    };
                }
            }
        }
    }

    fn item(&self, config: &TileConfig, a: &[T], b: &[T], c: &mut [T]) {
        if c.is_empty() {
            return;
        }
        let chunk = self.ldc * config.tile_n;

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            c.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(tile, c)| self.columns(config, a, b, c, tile * config.tile_n));
        }
        #[cfg(not(feature = "parallel"))]
        {
            c.chunks_mut(chunk)
                .enumerate()
                .for_each(|(tile, c)| self.columns(config, a, b, c, tile * config.tile_n));
        }
    }
}

/// Owned kernel arguments moved into the device command.
struct Launch<T> {
    shape: Shape<T>,
    a: DeviceBuffer<T>,
    b: DeviceBuffer<T>,
    c: DeviceBuffer<T>,
    batch_size: usize,
    config: TileConfig,
}

impl<T> Launch<T>
where
    T: Scalar,
{
    fn validate(&self) -> Result<(), String> {
        let Shape {
            transpose_a,
            transpose_b,
            m,
            k,
            n,
            lda,
            ldb,
            ldc,
            ..
        } = self.shape;
        self.config.validate()?;

        let min_lda = min_leading_dim(transpose_a, m, k).max(1);
        let min_ldb = min_leading_dim(transpose_b, k, n).max(1);
        if lda < min_lda {
            return Err(format!("lda={lda} must be at least {min_lda}"));
        }
        if ldb < min_ldb {
            return Err(format!("ldb={ldb} must be at least {min_ldb}"));
        }
        if ldc < m.max(1) {
            return Err(format!("ldc={ldc} must be at least {}", m.max(1)));
        }

        let (stride_a, stride_b, stride_c) =
            batch_strides(transpose_a, transpose_b, m, k, n, lda, ldb, ldc);
        for (name, buffer, stride) in [
            ("a", &self.a, stride_a),
            ("b", &self.b, stride_b),
            ("c", &self.c, stride_c),
        ] {
            let required = stride * self.batch_size;
            if buffer.len() < required {
                return Err(format!(
                    "buffer {name} holds {} elements but {required} are required",
                    buffer.len()
                ));
            }
        }

        if self.c.same_allocation(&self.a) || self.c.same_allocation(&self.b) {
            return Err("output buffer aliases an input buffer".to_string());
        }
        Ok(())
    }

    fn run(&self, items: Range<usize>) -> Result<(), String> {
        self.validate()?;
        let shape = &self.shape;
        let (stride_a, stride_b, stride_c) = batch_strides(
            shape.transpose_a,
            shape.transpose_b,
            shape.m,
            shape.k,
            shape.n,
            shape.lda,
            shape.ldb,
            shape.ldc,
        );
        let a = self.a.read();
        let b = self.b.read();
        let mut c = self.c.write();
        for item in items {
            shape.item(
                &self.config,
                &a[item * stride_a..][..stride_a],
                &b[item * stride_b..][..stride_b],
                &mut c[item * stride_c..][..stride_c],
            );
        }
        Ok(())
    }
}

impl<T> BatchedGemm<T> for GemmBatched
where
    T: Scalar,
{
    fn launch(&self, device: &Arc<Device>, args: &GemmArgs<'_, T>) -> Result<Events, Error> {
        let launch = Arc::new(Launch {
            shape: Shape {
                transpose_a: args.transpose_a,
                transpose_b: args.transpose_b,
                m: args.m,
                k: args.k,
                n: args.n,
                alpha: args.alpha,
                lda: args.lda,
                ldb: args.ldb,
                beta: args.beta,
                ldc: args.ldc,
            },
            a: args.a.clone(),
            b: args.b.clone(),
            c: args.c.clone(),
            batch_size: args.batch_size,
            config: self.config,
        });

        let per_launch = self.config.batches_per_launch.max(1);
        let mut groups: Vec<Range<usize>> = (0..args.batch_size)
            .step_by(per_launch)
            .map(|first| first..(first + per_launch).min(args.batch_size))
            .collect();
        if groups.is_empty() {
            // still validate the arguments on the device
            groups.push(0..0);
        }

        let mut events = Events::new();
        for items in groups {
            let launch = Arc::clone(&launch);
            let name = format!("gemm_batched<{}>[{}..{}]", T::NAME, items.start, items.end);
            log::trace!("enqueue {name} with tiles {}", self.config);
            events.push(device.launch(name, move || launch.run(items))?);
        }
        Ok(events)
    }

    fn name(&self) -> Option<&str> {
        Some("gemm_batched")
    }
}
