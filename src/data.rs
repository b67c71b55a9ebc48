use kernels::Scalar;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Random scalar in `[-1, 0.999]` with a step of `1e-3`.
///
/// Deliberately low quality: only 2000 distinct values, enough for
/// benchmark inputs that must not over- or underflow.
pub fn random_scalar<T>(rng: &mut impl Rng) -> T
where
    T: Scalar,
{
    let r: i64 = rng.gen_range(0..=i64::from(i32::MAX));
    T::from_f64(1e-3 * ((r % 2000) - 1000) as f64)
}

pub fn random_data<T>(rng: &mut impl Rng, size: usize) -> Vec<T>
where
    T: Scalar,
{
    (0..size).map(|_| random_scalar(rng)).collect()
}

/// Buffer of `size` elements whose contents do not matter.
#[must_use]
pub fn random_data_uninit<T>(size: usize) -> Vec<T>
where
    T: Scalar,
{
    vec![T::zero(); size]
}

#[must_use]
pub fn const_data<T>(size: usize, value: T) -> Vec<T>
where
    T: Scalar,
{
    vec![value; size]
}

/// Seeded source of benchmark inputs.
#[derive(Debug, Clone)]
pub struct DataGenerator {
    rng: StdRng,
}

impl DataGenerator {
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn scalar<T>(&mut self) -> T
    where
        T: Scalar,
    {
        random_scalar(&mut self.rng)
    }

    pub fn random<T>(&mut self, size: usize) -> Vec<T>
    where
        T: Scalar,
    {
        random_data(&mut self.rng, size)
    }
}

#[cfg(test)]
mod tests {
    use super::DataGenerator;

    #[test]
    fn values_stay_in_range() {
        let mut data = DataGenerator::from_seed(0);
        let values: Vec<f64> = data.random(10_000);
        assert!(values.iter().all(|v| (-1.0..=0.999 + 1e-12).contains(v)));
        // values are multiples of 1e-3
        assert!(values
            .iter()
            .all(|v| ((v * 1e3).round() - v * 1e3).abs() < 1e-6));
    }

    #[test]
    fn same_seed_same_data() {
        let a: Vec<f32> = DataGenerator::from_seed(42).random(64);
        let b: Vec<f32> = DataGenerator::from_seed(42).random(64);
        let c: Vec<f32> = DataGenerator::from_seed(43).random(64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn constant_and_uninit() {
        assert_eq!(super::const_data(3, 2.5_f32), vec![2.5; 3]);
        assert_eq!(super::random_data_uninit::<f64>(2), vec![0.0; 2]);
    }
}
