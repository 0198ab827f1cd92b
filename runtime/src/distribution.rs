//! Pull-based random variate sources.
//!
//! Every source owns its own seeded generator (derived from a parent generator at
//! construction), so sampling from one source never perturbs another and runs are
//! reproducible from a single seed.
//!
//! Time-like sources take their parameters in milliseconds and return samples in seconds
//! (divided by [CONVERSION]). Count-like and boolean sources are returned unconverted.

use crate::{Error, Time};
use rand::{
    distributions::{Bernoulli as RBernoulli, Uniform},
    rngs::StdRng,
    RngCore, SeedableRng,
};
use rand_distr::{Distribution as _, Exp, Normal as RNormal};
use serde::{Deserialize, Serialize};

/// Conversion from configured milliseconds to simulated seconds.
pub const CONVERSION: f64 = 1000.0;

/// A source of values that can be pulled one at a time.
pub trait Distribution<T> {
    /// Get the next value from this distribution.
    fn next(&mut self) -> T;
}

impl<T, D: Distribution<T> + ?Sized> Distribution<T> for Box<D> {
    fn next(&mut self) -> T {
        (**self).next()
    }
}

/// Derive an independent generator from `rng`.
fn fork(rng: &mut impl RngCore) -> StdRng {
    StdRng::seed_from_u64(rng.next_u64())
}

/// Always returns the same value.
#[derive(Clone, Debug)]
pub struct Constant<T> {
    value: T,
}

impl<T: Clone> Constant<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone> Distribution<T> for Constant<T> {
    fn next(&mut self) -> T {
        self.value.clone()
    }
}

/// Normally distributed time (configured in milliseconds).
///
/// Negative samples are clamped to zero.
pub struct Normal {
    inner: RNormal<f64>,
    rng: StdRng,
}

impl Normal {
    pub fn new(mean: f64, stdev: f64, rng: &mut impl RngCore) -> Result<Self, Error> {
        let inner = RNormal::new(mean, stdev)
            .map_err(|err| Error::InvalidDistribution(format!("normal: {err}")))?;
        Ok(Self {
            inner,
            rng: fork(rng),
        })
    }
}

impl Distribution<Time> for Normal {
    fn next(&mut self) -> Time {
        (self.inner.sample(&mut self.rng) / CONVERSION).max(0.0)
    }
}

/// Exponentially distributed time with rate `shape` (per millisecond).
pub struct Exponential {
    inner: Exp<f64>,
    rng: StdRng,
}

impl Exponential {
    pub fn new(shape: f64, rng: &mut impl RngCore) -> Result<Self, Error> {
        if shape.is_nan() || shape <= 0.0 {
            return Err(Error::InvalidDistribution(format!(
                "exponential: shape must be positive, got {shape}"
            )));
        }
        let inner = Exp::new(shape)
            .map_err(|err| Error::InvalidDistribution(format!("exponential: {err}")))?;
        Ok(Self {
            inner,
            rng: fork(rng),
        })
    }

    /// Exponential distribution whose samples have a mean of `mean` seconds.
    pub fn with_mean(mean: Time, rng: &mut impl RngCore) -> Result<Self, Error> {
        Self::new(1.0 / (CONVERSION * mean), rng)
    }
}

impl Distribution<Time> for Exponential {
    fn next(&mut self) -> Time {
        self.inner.sample(&mut self.rng) / CONVERSION
    }
}

/// Uniformly distributed integer in `[min, max]`.
pub struct UniformInt {
    inner: Uniform<usize>,
    rng: StdRng,
}

impl UniformInt {
    pub fn new(min: usize, max: usize, rng: &mut impl RngCore) -> Result<Self, Error> {
        if min > max {
            return Err(Error::InvalidRange(min, max));
        }
        Ok(Self {
            inner: Uniform::new_inclusive(min, max),
            rng: fork(rng),
        })
    }
}

impl Distribution<usize> for UniformInt {
    fn next(&mut self) -> usize {
        self.inner.sample(&mut self.rng)
    }
}

/// Returns `true` with probability `p`.
pub struct Bernoulli {
    inner: RBernoulli,
    rng: StdRng,
}

impl Bernoulli {
    pub fn new(p: f64, rng: &mut impl RngCore) -> Result<Self, Error> {
        let inner = RBernoulli::new(p).map_err(|_| Error::InvalidProbability(p))?;
        Ok(Self {
            inner,
            rng: fork(rng),
        })
    }
}

impl Distribution<bool> for Bernoulli {
    fn next(&mut self) -> bool {
        self.inner.sample(&mut self.rng)
    }
}

/// Source of delivery outcomes: `true` with probability `success_rate`.
///
/// A rate of `1.0` never consumes randomness.
pub fn success(
    success_rate: f64,
    rng: &mut impl RngCore,
) -> Result<Box<dyn Distribution<bool>>, Error> {
    if success_rate == 1.0 {
        return Ok(Box::new(Constant::new(true)));
    }
    Ok(Box::new(Bernoulli::new(success_rate, rng)?))
}

/// Serializable description of a time-like distribution (parameters in milliseconds).
///
/// ```rust
/// use pilo_runtime::Spec;
///
/// let spec = Spec::Constant { mean: 2.0 };
/// assert_eq!(spec.mean(), 0.002);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distro", rename_all = "lowercase")]
pub enum Spec {
    Constant { mean: f64 },
    Normal { mean: f64, stdev: f64 },
    Exponential { shape: f64 },
}

impl Spec {
    /// Build a sampler for this distribution, forking a generator from `rng`.
    pub fn build(&self, rng: &mut impl RngCore) -> Result<Box<dyn Distribution<Time>>, Error> {
        Ok(match *self {
            Self::Constant { mean } => {
                if !mean.is_finite() || mean < 0.0 {
                    return Err(Error::InvalidDistribution(format!(
                        "constant: mean must be non-negative, got {mean}"
                    )));
                }
                Box::new(Constant::new(mean / CONVERSION))
            }
            Self::Normal { mean, stdev } => Box::new(Normal::new(mean, stdev, rng)?),
            Self::Exponential { shape } => Box::new(Exponential::new(shape, rng)?),
        })
    }

    /// Expected value of a sample, in seconds.
    pub fn mean(&self) -> Time {
        match *self {
            Self::Constant { mean } | Self::Normal { mean, .. } => mean / CONVERSION,
            Self::Exponential { shape } => 1.0 / shape / CONVERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn average(distribution: &mut dyn Distribution<Time>, samples: usize) -> f64 {
        (0..samples).map(|_| distribution.next()).sum::<f64>() / samples as f64
    }

    #[test]
    fn test_constant_converts_to_seconds() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut latency = Spec::Constant { mean: 5.0 }.build(&mut rng).unwrap();
        assert_eq!(latency.next(), 0.005);
        assert_eq!(latency.next(), 0.005);
    }

    #[test]
    fn test_normal_mean() {
        let mut rng = StdRng::seed_from_u64(0);
        let spec = Spec::Normal {
            mean: 10.0,
            stdev: 1.0,
        };
        let mut latency = spec.build(&mut rng).unwrap();
        let avg = average(&mut latency, 10_000);
        assert!((avg - spec.mean()).abs() < 0.0005, "avg={avg}");
    }

    #[test]
    fn test_normal_never_negative() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut latency = Normal::new(0.0, 10.0, &mut rng).unwrap();
        assert!((0..1_000).all(|_| latency.next() >= 0.0));
    }

    #[test]
    fn test_exponential_with_mean() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut mttf = Exponential::with_mean(600.0, &mut rng).unwrap();
        let avg = average(&mut mttf, 20_000);
        assert!((avg - 600.0).abs() < 30.0, "avg={avg}");
    }

    #[test]
    fn test_uniform_int_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pick = UniformInt::new(2, 4, &mut rng).unwrap();
        let mut seen = [false; 5];
        for _ in 0..1_000 {
            let value = pick.next();
            assert!((2..=4).contains(&value));
            seen[value] = true;
        }
        assert_eq!(seen, [false, false, true, true, true]);
        assert!(matches!(
            UniformInt::new(4, 2, &mut rng),
            Err(Error::InvalidRange(4, 2))
        ));
    }

    #[test_case(0.0, false ; "never")]
    #[test_case(1.0, true ; "always")]
    fn test_success_extremes(rate: f64, expected: bool) {
        let mut rng = StdRng::seed_from_u64(4);
        let mut outcome = success(rate, &mut rng).unwrap();
        assert!((0..100).all(|_| outcome.next() == expected));
    }

    #[test_case(-0.1 ; "negative")]
    #[test_case(1.5 ; "above one")]
    fn test_invalid_probability(rate: f64) {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(matches!(
            success(rate, &mut rng),
            Err(Error::InvalidProbability(_))
        ));
    }

    #[test_case(Spec::Constant { mean: -1.0 } ; "negative constant")]
    #[test_case(Spec::Normal { mean: 1.0, stdev: -1.0 } ; "negative stdev")]
    #[test_case(Spec::Exponential { shape: 0.0 } ; "zero shape")]
    fn test_invalid_spec(spec: Spec) {
        let mut rng = StdRng::seed_from_u64(6);
        assert!(matches!(
            spec.build(&mut rng),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_forked_sources_are_reproducible() {
        let sample = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut first = Exponential::new(1.0, &mut rng).unwrap();
            let mut second = Exponential::new(1.0, &mut rng).unwrap();
            (first.next(), second.next())
        };
        assert_eq!(sample(7), sample(7));
        let (first, second) = sample(7);
        assert_ne!(first, second);
    }

    #[test]
    fn test_spec_from_yaml() {
        let normal: Spec =
            serde_yaml::from_str("distro: normal\nmean: 1.5\nstdev: 0.5\n").unwrap();
        assert_eq!(
            normal,
            Spec::Normal {
                mean: 1.5,
                stdev: 0.5
            }
        );
        let constant: Spec = serde_yaml::from_str("{distro: constant, mean: 1}").unwrap();
        assert_eq!(constant, Spec::Constant { mean: 1.0 });
        assert!(serde_yaml::from_str::<Spec>("distro: pareto\nmean: 1").is_err());
    }
}
