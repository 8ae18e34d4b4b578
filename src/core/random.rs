use std::f64::consts::PI;

use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::{SimError, SimResult, ensure_finite};

// Keeps `ln(u1)` finite when the uniform draw lands on 0.
const MIN_UNIFORM: f64 = 1e-12;

// Box-Muller; the paired sine variate is discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalVariate {
    mean: f64,
    std_dev: f64,
}

impl NormalVariate {
    pub fn new(mean: f64, variance: f64) -> SimResult<Self> {
        ensure_finite("mean", mean)?;
        ensure_finite("variance", variance)?;
        if variance < 0.0 {
            return Err(SimError::invalid(
                "variance",
                format!("must be >= 0, got {variance}"),
            ));
        }
        Ok(Self {
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

impl Distribution<f64> for NormalVariate {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.mean + standard_normal(rng) * self.std_dev
    }
}

/// The inner Gaussian draw is taken from `N(mean, variance)` rather than `N(0, 1)`,
/// then scaled by `sigma_y` and shifted by `mu_y`. Outputs therefore do not have the
/// requested mean and variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormalVariate {
    inner: NormalVariate,
    mu_y: f64,
    sigma_y: f64,
}

impl LogNormalVariate {
    pub fn new(mean: f64, variance: f64) -> SimResult<Self> {
        let inner = NormalVariate::new(mean, variance)?;
        if mean <= 0.0 {
            return Err(SimError::invalid(
                "mean",
                format!("log-normal mean must be > 0, got {mean}"),
            ));
        }
        let sigma_y = (1.0 + variance / (mean * mean)).ln().sqrt();
        let mu_y = mean.ln() - 0.5 * sigma_y * sigma_y;
        Ok(Self {
            inner,
            mu_y,
            sigma_y,
        })
    }
}

impl Distribution<f64> for LogNormalVariate {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        (self.mu_y + self.sigma_y * self.inner.sample(rng)).exp()
    }
}

pub fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, variance: f64) -> SimResult<f64> {
    Ok(NormalVariate::new(mean, variance)?.sample(rng))
}

pub fn lognormal<R: Rng + ?Sized>(rng: &mut R, mean: f64, variance: f64) -> SimResult<f64> {
    Ok(LogNormalVariate::new(mean, variance)?.sample(rng))
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = rng.random::<f64>().max(MIN_UNIFORM);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

pub fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    let mixed = base_seed ^ ((trial_id as u64) << 32) ^ trial_id as u64;
    splitmix64(mixed)
}

pub fn trial_rng(base_seed: u64, trial_id: u32) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base_seed, trial_id))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
