//! Descriptive statistics over measured values (throughput, busy
//! time, ..). Unlike a plain mean, the spread measures need at least
//! two values; with fewer they are `None`, never 0 or NaN.

use num_traits::{Pow, Zero};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("no inputs given")]
    NoInputs,
    #[error("non-finite input value {0}")]
    NonFinite(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub num_values: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Interpolated for even numbers of input values.
    pub median: f64,
    /// Lower and upper quartile, linearly interpolated between the
    /// closest ranks.
    pub quartiles: (f64, f64),
    /// Sum of squared differences from the mean divided by n - 1;
    /// `None` for a single value.
    pub sample_variance: Option<f64>,
}

/// Quantile `q` (0..=1) of sorted, non-empty `vals`.
fn interpolated_quantile(vals: &[f64], q: f64) -> f64 {
    let pos = q * (vals.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    vals[lo] + (vals[hi] - vals[lo]) * frac
}

impl Stats {
    pub fn from_values(mut vals: Vec<f64>) -> Result<Self, StatsError> {
        let num_values = vals.len();
        if num_values.is_zero() {
            return Err(StatsError::NoInputs);
        }
        if let Some(v) = vals.iter().find(|v| !v.is_finite()) {
            return Err(StatsError::NonFinite(*v));
        }
        let sum: f64 = vals.iter().sum();
        let mean = sum / num_values as f64;

        let sample_variance = if num_values < 2 {
            None
        } else {
            let squares: f64 = vals.iter().map(|v| (*v - mean).pow(2)).sum();
            Some(squares / (num_values - 1) as f64)
        };

        vals.sort_by(f64::total_cmp);

        Ok(Stats {
            num_values,
            mean,
            min: vals[0],
            max: vals[num_values - 1],
            median: interpolated_quantile(&vals, 0.5),
            quartiles: (
                interpolated_quantile(&vals, 0.25),
                interpolated_quantile(&vals, 0.75),
            ),
            sample_variance,
        })
    }

    /// Like `from_values`, absent values are skipped; `None` if
    /// nothing remains.
    pub fn from_present(vals: impl IntoIterator<Item = Option<f64>>) -> Option<Self> {
        Self::from_values(vals.into_iter().flatten().collect()).ok()
    }

    pub fn standard_deviation(&self) -> Option<f64> {
        self.sample_variance.map(f64::sqrt)
    }

    /// Sample standard deviation divided by sqrt(n).
    pub fn standard_error(&self) -> Option<f64> {
        Some(self.standard_deviation()? / (self.num_values as f64).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn t_three_runs() -> Result<()> {
        let stats = Stats::from_values(vec![300., 100., 200.])?;
        assert_eq!(stats.num_values, 3);
        assert_relative_eq!(stats.mean, 200.);
        assert_eq!(stats.min, 100.);
        assert_eq!(stats.max, 300.);
        assert_eq!(stats.median, 200.);
        assert_relative_eq!(stats.sample_variance.unwrap(), 10000.);
        assert_relative_eq!(stats.standard_deviation().unwrap(), 100.);
        assert_relative_eq!(stats.standard_error().unwrap(), 100. / 3f64.sqrt());
        Ok(())
    }

    #[test]
    fn t_single_value_has_no_spread() -> Result<()> {
        let stats = Stats::from_values(vec![42.])?;
        assert_eq!(stats.mean, 42.);
        assert_eq!(stats.standard_deviation(), None);
        assert_eq!(stats.standard_error(), None);
        Ok(())
    }

    #[test]
    fn t_quartiles() -> Result<()> {
        let stats = Stats::from_values(vec![4., 1., 3., 2.])?;
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.quartiles, (1.75, 3.25));
        Ok(())
    }

    #[test]
    fn t_errors() {
        assert_eq!(Stats::from_values(vec![]), Err(StatsError::NoInputs));
        assert!(Stats::from_values(vec![1., f64::INFINITY]).is_err());
        assert_eq!(Stats::from_present([None, None]), None);
        assert_eq!(
            Stats::from_present([None, Some(2.), Some(4.)]).map(|s| s.mean),
            Some(3.)
        );
    }
}
