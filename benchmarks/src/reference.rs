use super::Scalar;
use exec::Transposition;

/// Number of stored columns of an operand with `rows x cols` logical shape.
#[must_use]
pub fn stored_cols(transpose: Transposition, rows: usize, cols: usize) -> usize {
    if transpose.is_transposed() {
        rows
    } else {
        cols
    }
}

/// Minimum leading dimension of an operand with `rows x cols` logical shape.
#[must_use]
pub fn min_leading_dim(transpose: Transposition, rows: usize, cols: usize) -> usize {
    if transpose.is_transposed() {
        cols
    } else {
        rows
    }
}

/// Element strides between consecutive batch items of `a`, `b` and `c`.
#[must_use]
pub fn batch_strides(
    transpose_a: Transposition,
    transpose_b: Transposition,
    m: usize,
    k: usize,
    n: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) -> (usize, usize, usize) {
    (
        lda * stored_cols(transpose_a, m, k),
        ldb * stored_cols(transpose_b, k, n),
        ldc * n,
    )
}

/// Trusted host GEMM: `C = alpha * op(A) * op(B) + beta * C`.
///
/// Column-major with BLAS argument order. `C` is not read when `beta` is zero.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T>(
    transpose_a: Transposition,
    transpose_b: Transposition,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
) where
    T: Scalar,
{
    assert!(lda >= min_leading_dim(transpose_a, m, k).max(1));
    assert!(ldb >= min_leading_dim(transpose_b, k, n).max(1));
    assert!(ldc >= m.max(1));

    for j in 0..n {
        for i in 0..m {
            let mut sum = T::zero();
            for l in 0..k {
                let a_il = if transpose_a.is_transposed() {
                    a[l + i * lda]
                } else {
                    a[i + l * lda]
                };
                let b_lj = if transpose_b.is_transposed() {
                    b[j + l * ldb]
                } else {
                    b[l + j * ldb]
                };
                sum += a_il * b_lj;
            }
            let c_ij = &mut c[i + j * ldc];
            *c_ij = if beta.is_zero() {
                alpha * sum
            } else {
                alpha * sum + beta * *c_ij
            };
        }
    }
}

/// [`gemm`] applied to every item of a batch stored back to back.
#[allow(clippy::too_many_arguments)]
pub fn gemm_batched<T>(
    transpose_a: Transposition,
    transpose_b: Transposition,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
    batch_size: usize,
) where
    T: Scalar,
{
    let (stride_a, stride_b, stride_c) =
        batch_strides(transpose_a, transpose_b, m, k, n, lda, ldb, ldc);
    for item in 0..batch_size {
        gemm(
            transpose_a,
            transpose_b,
            m,
            n,
            k,
            alpha,
            &a[item * stride_a..][..stride_a],
            lda,
            &b[item * stride_b..][..stride_b],
            ldb,
            beta,
            &mut c[item * stride_c..][..stride_c],
            ldc,
        );
    }
}

#[cfg(test)]
mod tests {
    use exec::Transposition;
    use ndarray::{Array2, ShapeBuilder};
    use rand::{Rng, SeedableRng};

    const EPSILON: f64 = 1e-10;

    fn column_major(rows: usize, cols: usize, data: &[f64]) -> Array2<f64> {
        Array2::from_shape_vec((rows, cols).f(), data.to_vec()).unwrap()
    }

    #[test]
    fn matches_ndarray_for_all_transpositions() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (m, k, n) = (5, 3, 4);
        let (alpha, beta) = (1.5, 0.5);
        for ta in [Transposition::Normal, Transposition::Transposed] {
            for tb in [Transposition::Normal, Transposition::Conjugate] {
                let (a_rows, a_cols) = if ta.is_transposed() { (k, m) } else { (m, k) };
                let (b_rows, b_cols) = if tb.is_transposed() { (n, k) } else { (k, n) };
                let a: Vec<f64> = (0..m * k).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let b: Vec<f64> = (0..k * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let c0: Vec<f64> = (0..m * n).map(|_| rng.gen_range(-1.0..1.0)).collect();

                let mut op_a = column_major(a_rows, a_cols, &a);
                if ta.is_transposed() {
                    op_a = op_a.reversed_axes();
                }
                let mut op_b = column_major(b_rows, b_cols, &b);
                if tb.is_transposed() {
                    op_b = op_b.reversed_axes();
                }
                let want = op_a.dot(&op_b) * alpha + column_major(m, n, &c0) * beta;

                let mut c = c0.clone();
                super::gemm(ta, tb, m, n, k, alpha, &a, a_rows, &b, b_rows, beta, &mut c, m);
                let have = column_major(m, n, &c);
                for ((i, j), want) in want.indexed_iter() {
                    approx::assert_abs_diff_eq!(have[[i, j]], *want, epsilon = EPSILON);
                }
            }
        }
    }

    #[test]
    fn zero_beta_ignores_output_contents() {
        let a = [1.0_f32, 2.0, 3.0, 4.0];
        let b = [1.0_f32, 0.0, 0.0, 1.0];
        let mut c = [f32::NAN; 4];
        super::gemm(
            Transposition::Normal,
            Transposition::Normal,
            2,
            2,
            2,
            2.0,
            &a,
            2,
            &b,
            2,
            0.0,
            &mut c,
            2,
        );
        assert_eq!(c, [2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn batched_items_are_independent() {
        let (m, k, n) = (2, 2, 2);
        // second item of a is the identity, first is all ones
        let a = [1.0_f64, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let b = [1.0_f64, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0];
        let mut c = [0.0_f64; 8];
        super::gemm_batched(
            Transposition::Normal,
            Transposition::Normal,
            m,
            n,
            k,
            1.0,
            &a,
            m,
            &b,
            k,
            0.0,
            &mut c,
            m,
            2,
        );
        assert_eq!(c, [3.0, 3.0, 7.0, 7.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn strides_follow_leading_dims() {
        let strides =
            super::batch_strides(Transposition::Transposed, Transposition::Normal, 4, 3, 2, 3, 3, 4);
        assert_eq!(strides, (12, 6, 8));
    }
}
