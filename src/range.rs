use super::Error;
use exec::Transposition;
use kernels::Scalar;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One batched GEMM benchmark configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GemmBatchedParams<T> {
    t_a: String,
    t_b: String,
    m: usize,
    k: usize,
    n: usize,
    alpha: T,
    beta: T,
    batch_size: usize,
}

impl<T> GemmBatchedParams<T>
where
    T: Scalar,
{
    /// Validate and build a parameter tuple.
    ///
    /// Transposition strings are kept as given. Unknown strings are
    /// not rejected and behave like `n`.
    pub fn new(
        t_a: impl Into<String>,
        t_b: impl Into<String>,
        m: usize,
        k: usize,
        n: usize,
        alpha: T,
        beta: T,
        batch_size: usize,
    ) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidParams { row: None, reason };
        for (name, value) in [("m", m), ("k", k), ("n", n), ("batch_size", batch_size)] {
            if value == 0 {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        for (name, value) in [("alpha", alpha), ("beta", beta)] {
            if !value.is_finite() {
                return Err(invalid(format!("{name}={value} is not finite")));
            }
        }
        let elem_size = std::mem::size_of::<T>();
        for (name, rows, cols) in [("a", m, k), ("b", k, n), ("c", m, n)] {
            let bytes = rows
                .checked_mul(cols)
                .and_then(|count| count.checked_mul(batch_size))
                .and_then(|count| count.checked_mul(elem_size));
            if bytes.is_none() {
                return Err(invalid(format!(
                    "{name} with {rows}x{cols}x{batch_size} elements overflows"
                )));
            }
        }
        let (t_a, t_b) = (t_a.into(), t_b.into());
        if t_a.is_empty() || t_b.is_empty() {
            return Err(invalid("empty transposition".to_string()));
        }
        Ok(Self {
            t_a,
            t_b,
            m,
            k,
            n,
            alpha,
            beta,
            batch_size,
        })
    }

    #[must_use]
    pub fn t_a(&self) -> &str {
        &self.t_a
    }

    #[must_use]
    pub fn t_b(&self) -> &str {
        &self.t_b
    }

    #[must_use]
    pub fn transpose_a(&self) -> Transposition {
        exec::to_transpose_enum(&self.t_a)
    }

    #[must_use]
    pub fn transpose_b(&self) -> Transposition {
        exec::to_transpose_enum(&self.t_b)
    }

    #[must_use]
    pub fn m(&self) -> usize {
        self.m
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn alpha(&self) -> T {
        self.alpha
    }

    #[must_use]
    pub fn beta(&self) -> T {
        self.beta
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<T> std::fmt::Display for GemmBatchedParams<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.t_a, self.t_b, self.m, self.k, self.n, self.batch_size
        )
    }
}

/// Geometric range `min, min * mult, ...` up to and including `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: usize,
    pub max: usize,
    pub mult: usize,
}

impl SizeRange {
    #[must_use]
    pub fn new(min: usize, max: usize, mult: usize) -> Self {
        Self { min, max, mult }
    }
}

impl IntoIterator for SizeRange {
    type Item = usize;
    type IntoIter = Sizes;

    fn into_iter(self) -> Self::IntoIter {
        let Self { min, max, mult } = self;
        Sizes {
            next: (min > 0 && min <= max).then_some(min),
            max,
            mult,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sizes {
    next: Option<usize>,
    max: usize,
    mult: usize,
}

impl Iterator for Sizes {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.next?;
        self.next = if self.mult < 2 {
            None
        } else {
            size.checked_mul(self.mult).filter(|next| *next <= self.max)
        };
        Some(size)
    }
}

/// Explicit list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange<T>(pub Vec<T>);

impl<T> IntoIterator for ValueRange<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

pub const DEFAULT_DIM_MIN: usize = 2 << 5;
pub const DEFAULT_DIM_MAX: usize = 2 << 10;
pub const DEFAULT_DIM_MULT: usize = 2;
pub const DEFAULT_BATCH_SIZE: usize = 5;

pub type Params<T> = Box<dyn Iterator<Item = Result<GemmBatchedParams<T>, Error>>>;

/// Built-in sweep over `{n, t} x {n, t}` and power of two dimensions.
pub fn default_range<T>() -> impl Iterator<Item = GemmBatchedParams<T>>
where
    T: Scalar,
{
    let transposes = ValueRange(vec!["n", "t"]);
    let dims = SizeRange::new(DEFAULT_DIM_MIN, DEFAULT_DIM_MAX, DEFAULT_DIM_MULT);
    itertools::iproduct!(
        transposes.clone(),
        transposes,
        dims,
        dims,
        dims
    )
    .map(|(t_a, t_b, m, k, n)| GemmBatchedParams {
        t_a: t_a.to_string(),
        t_b: t_b.to_string(),
        m,
        k,
        n,
        alpha: T::one(),
        beta: T::zero(),
        batch_size: DEFAULT_BATCH_SIZE,
    })
}

type Row = (String, String, usize, usize, usize, f64, f64, usize);

/// Read headerless CSV rows `t_a,t_b,m,k,n,alpha,beta,batch_size`.
///
/// Rows are parsed lazily. Malformed rows yield [`Error::InvalidParams`]
/// carrying the one-based row number.
pub fn from_csv<T, R>(reader: R) -> impl Iterator<Item = Result<GemmBatchedParams<T>, Error>>
where
    T: Scalar,
    R: std::io::Read,
{
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);
    reader
        .into_deserialize::<Row>()
        .enumerate()
        .map(|(idx, row)| {
            let row_num = Some(idx + 1);
            let (t_a, t_b, m, k, n, alpha, beta, batch_size) =
                row.map_err(|err| Error::InvalidParams {
                    row: row_num,
                    reason: err.to_string(),
                })?;
            GemmBatchedParams::new(
                t_a,
                t_b,
                m,
                k,
                n,
                T::from_f64(alpha),
                T::from_f64(beta),
                batch_size,
            )
            .map_err(|err| match err {
                Error::InvalidParams { reason, .. } => Error::InvalidParams {
                    row: row_num,
                    reason,
                },
                other => other,
            })
        })
}

/// Where the parameter tuples of a sweep come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParamSource {
    #[default]
    Default,
    File(PathBuf),
}

impl ParamSource {
    pub fn params<T>(&self) -> Result<Params<T>, Error>
    where
        T: Scalar,
    {
        match self {
            Self::Default => Ok(Box::new(default_range::<T>().map(Ok))),
            Self::File(path) => {
                log::info!("reading parameters from {}", path.display());
                let reader = utils::fs::open_readable(path)?;
                Ok(Box::new(from_csv::<T, _>(reader)))
            }
        }
    }
}
