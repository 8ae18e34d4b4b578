use serde::Serialize;

use super::error::{SimError, SimResult, ensure_finite};
use super::types::{Batch, SimulationResult};

// The last bin collects overflow.
pub const HISTOGRAM_BINS: usize = 30;
pub const BIN_WIDTH_UNIT: f64 = 100_000.0;
const BIN_WIDTH_PERCENTILE: f64 = 50.0;
const BINS_PER_MEDIAN: f64 = 4.0;

fn sorted_copy(values: &[f64], what: &'static str) -> SimResult<Vec<f64>> {
    if values.is_empty() {
        return Err(SimError::EmptyInput { what });
    }
    for &value in values {
        ensure_finite("values", value)?;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(sorted)
}

fn check_percentile(p: f64) -> SimResult<f64> {
    if p.is_finite() && (0.0..=100.0).contains(&p) {
        Ok(p)
    } else {
        Err(SimError::invalid(
            "percentile",
            format!("must be between 0 and 100, got {p}"),
        ))
    }
}

/// Lookup is by value: every element equal to `value` gets the position of the
/// first match, so tied trials share a rank. A single-element set ranks 0.
pub fn percentile_rank(sorted: &[f64], value: f64) -> SimResult<f64> {
    if sorted.is_empty() {
        return Err(SimError::EmptyInput {
            what: "percentile rank",
        });
    }
    if sorted.len() == 1 {
        return Ok(0.0);
    }
    let index = sorted.partition_point(|v| v.total_cmp(&value).is_lt());
    Ok(100.0 * index as f64 / (sorted.len() - 1) as f64)
}

pub fn assign_percentiles(trials: &mut [SimulationResult], retirement_age: u32) -> SimResult<()> {
    let values: Vec<f64> = trials
        .iter()
        .map(|trial| trial.value_at(retirement_age))
        .collect();
    let sorted = sorted_copy(&values, "percentile rank")?;
    for (trial, value) in trials.iter_mut().zip(values) {
        trial.percentile = percentile_rank(&sorted, value)?;
    }
    Ok(())
}

// Interpolated at rank `p / 100 * (n - 1)`.
pub fn percentile_cutpoints(values: &[f64], percentiles: &[f64]) -> SimResult<Vec<f64>> {
    let sorted = sorted_copy(values, "percentile cut-points")?;
    percentiles
        .iter()
        .map(|&p| Ok(interpolate(&sorted, check_percentile(p)?)))
        .collect()
}

fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

// Index `floor(p / 100 * n)`, no interpolation; p = 100 clamps to the maximum.
pub fn floor_percentiles(values: &[f64], percentiles: &[f64]) -> SimResult<Vec<f64>> {
    let sorted = sorted_copy(values, "floor percentiles")?;
    let n = sorted.len();
    percentiles
        .iter()
        .map(|&p| {
            let p = check_percentile(p)?;
            let index = ((p / 100.0) * n as f64).floor() as usize;
            Ok(sorted[index.min(n - 1)])
        })
        .collect()
}

// Both bounds inclusive: a trial on a boundary belongs to two neighbouring deciles.
pub fn decile_members(batch: &Batch, decile: u8) -> SimResult<Vec<usize>> {
    if decile > 9 {
        return Err(SimError::invalid(
            "decile",
            format!("must be between 0 and 9, got {decile}"),
        ));
    }
    let low = decile as f64 * 10.0;
    let high = low + 10.0;
    Ok(batch
        .trials()
        .iter()
        .enumerate()
        .filter(|(_, trial)| trial.percentile >= low && trial.percentile <= high)
        .map(|(idx, _)| idx)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBand {
    pub age: u32,
    pub values: Vec<f64>,
}

pub fn yearly_bands(batch: &Batch, percentiles: &[f64]) -> SimResult<Vec<YearBand>> {
    let Some(first) = batch.trials().first() else {
        return Err(SimError::EmptyInput {
            what: "yearly bands",
        });
    };

    let mut columns: Vec<Vec<f64>> = first
        .trajectory
        .iter()
        .map(|_| Vec::with_capacity(batch.len()))
        .collect();
    for trial in batch.trials() {
        for (column, year) in columns.iter_mut().zip(&trial.trajectory) {
            column.push(year.account_value);
        }
    }

    first
        .trajectory
        .iter()
        .zip(columns)
        .map(|(year, column)| {
            Ok(YearBand {
                age: year.age,
                values: percentile_cutpoints(&column, percentiles)?,
            })
        })
        .collect()
}

// Ages >= max_age are dropped, not clipped.
pub fn depletion_probability_distribution(
    depletion_ages: &[u32],
    max_age: u32,
) -> SimResult<Vec<f64>> {
    if depletion_ages.is_empty() {
        return Err(SimError::EmptyInput {
            what: "depletion distribution",
        });
    }
    if max_age == 0 {
        return Err(SimError::invalid("max_age", "must be > 0"));
    }

    let mut frequency = vec![0_u32; max_age as usize];
    for &age in depletion_ages {
        if let Some(slot) = frequency.get_mut(age as usize) {
            *slot += 1;
        }
    }

    let total = depletion_ages.len() as f64;
    Ok(frequency.into_iter().map(|count| count as f64 / total).collect())
}

pub fn survival_probability_curve(depletion_ages: &[u32], max_age: u32) -> SimResult<Vec<f64>> {
    let pmf = depletion_probability_distribution(depletion_ages, max_age)?;
    let mut cumulative = 0.0;
    Ok(pmf
        .into_iter()
        .map(|p| {
            cumulative += p;
            (1.0 - cumulative).clamp(0.0, 1.0)
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurvivalCurve {
    pub ages: Vec<u32>,
    pub probabilities: Vec<f64>,
}

impl SurvivalCurve {
    pub fn new(depletion_ages: &[u32], max_age: u32) -> SimResult<Self> {
        let probabilities = survival_probability_curve(depletion_ages, max_age)?;
        Ok(Self {
            ages: (0..max_age).collect(),
            probabilities,
        })
    }

    pub fn from_age(&self, age: u32) -> Self {
        let start = (age as usize).min(self.ages.len());
        Self {
            ages: self.ages[start..].to_vec(),
            probabilities: self.probabilities[start..].to_vec(),
        }
    }
}

pub fn derive_bin_width(values: &[f64]) -> SimResult<f64> {
    let median = floor_percentiles(values, &[BIN_WIDTH_PERCENTILE])?[0];
    let rounded = (median / BINS_PER_MEDIAN / BIN_WIDTH_UNIT).round() * BIN_WIDTH_UNIT;
    // A zero width would leave every value in the overflow bin.
    Ok(rounded.max(BIN_WIDTH_UNIT))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Histogram {
    pub bin_width: f64,
    pub counts: Vec<u32>,
    pub probabilities: Vec<f64>,
}

pub fn histogram(values: &[f64], bin_width: f64, bin_count: usize) -> SimResult<Histogram> {
    if values.is_empty() {
        return Err(SimError::EmptyInput { what: "histogram" });
    }
    if !bin_width.is_finite() || bin_width <= 0.0 {
        return Err(SimError::invalid(
            "bin_width",
            format!("must be finite and > 0, got {bin_width}"),
        ));
    }
    if bin_count == 0 {
        return Err(SimError::invalid("bin_count", "must be > 0"));
    }

    let overflow = bin_count - 1;
    let overflow_start = bin_width * overflow as f64;
    let mut counts = vec![0_u32; bin_count];
    for &value in values {
        let value = ensure_finite("values", value)?.max(0.0);
        let index = if value < overflow_start {
            ((value / bin_width).floor() as usize).min(overflow)
        } else {
            overflow
        };
        counts[index] += 1;
    }

    let total = values.len() as f64;
    let probabilities = counts.iter().map(|&c| c as f64 / total).collect();
    Ok(Histogram {
        bin_width,
        counts,
        probabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MAX_AGE, NEVER_DEPLETED, SimulationYear};
    use proptest::collection::vec;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn trial_with_value(age: u32, value: f64) -> SimulationResult {
        SimulationResult {
            trajectory: vec![SimulationYear::empty(age, value)],
            age_at_depletion: NEVER_DEPLETED,
            percentile: 0.0,
        }
    }

    #[test]
    fn cutpoints_interpolate_between_points() {
        let cuts = percentile_cutpoints(&[40.0, 10.0, 30.0, 20.0], &[50.0]).unwrap();
        assert_approx(cuts[0], 25.0);

        let cuts = percentile_cutpoints(&[1.0, 2.0, 3.0, 4.0], &[0.0, 25.0, 100.0]).unwrap();
        assert_approx(cuts[0], 1.0);
        assert_approx(cuts[1], 1.75);
        assert_approx(cuts[2], 4.0);
    }

    #[test]
    fn floor_percentiles_differ_from_cutpoints_at_boundaries() {
        let values = [10.0, 20.0, 30.0, 40.0];
        let floor = floor_percentiles(&values, &[50.0, 99.9, 100.0]).unwrap();
        assert_approx(floor[0], 30.0);
        assert_approx(floor[1], 40.0);
        assert_approx(floor[2], 40.0);

        let cut = percentile_cutpoints(&values, &[50.0]).unwrap();
        assert!((cut[0] - floor[0]).abs() > 1.0);
    }

    #[test]
    fn empty_and_out_of_range_inputs_fail() {
        assert_eq!(
            percentile_cutpoints(&[], &[50.0]),
            Err(SimError::EmptyInput {
                what: "percentile cut-points"
            })
        );
        assert!(floor_percentiles(&[], &[50.0]).is_err());
        assert!(percentile_cutpoints(&[1.0], &[101.0]).is_err());
        assert!(percentile_cutpoints(&[1.0], &[f64::NAN]).is_err());
        assert!(percentile_cutpoints(&[f64::NAN], &[50.0]).is_err());
        assert!(percentile_rank(&[], 1.0).is_err());
    }

    #[test]
    fn percentile_rank_uses_first_matching_position() {
        let sorted = [1.0, 2.0, 2.0, 2.0, 5.0];
        assert_approx(percentile_rank(&sorted, 1.0).unwrap(), 0.0);
        assert_approx(percentile_rank(&sorted, 2.0).unwrap(), 25.0);
        assert_approx(percentile_rank(&sorted, 5.0).unwrap(), 100.0);
        assert_approx(percentile_rank(&[7.0], 7.0).unwrap(), 0.0);
    }

    #[test]
    fn assign_percentiles_gives_ties_identical_rank() {
        let mut trials = vec![
            trial_with_value(65, 300.0),
            trial_with_value(65, 100.0),
            trial_with_value(65, 300.0),
            trial_with_value(65, 200.0),
            trial_with_value(65, 500.0),
        ];
        assign_percentiles(&mut trials, 65).unwrap();
        let ranks: Vec<f64> = trials.iter().map(|t| t.percentile).collect();
        assert_eq!(ranks, vec![50.0, 0.0, 50.0, 25.0, 100.0]);
    }

    #[test]
    fn missing_retirement_year_ranks_as_zero_value() {
        let mut trials = vec![trial_with_value(70, 900.0), trial_with_value(65, 10.0)];
        assign_percentiles(&mut trials, 65).unwrap();
        assert_approx(trials[0].percentile, 0.0);
        assert_approx(trials[1].percentile, 100.0);
    }

    #[test]
    fn decile_members_include_both_boundaries() {
        let mut trials: Vec<SimulationResult> = (0..11)
            .map(|i| trial_with_value(65, i as f64))
            .collect();
        assign_percentiles(&mut trials, 65).unwrap();
        let batch = Batch::new(65, trials);
        assert_eq!(decile_members(&batch, 0).unwrap(), vec![0, 1]);
        assert_eq!(decile_members(&batch, 9).unwrap(), vec![9, 10]);
        assert!(decile_members(&batch, 10).is_err());
    }

    #[test]
    fn yearly_bands_cover_every_age() {
        let trials = vec![
            SimulationResult {
                trajectory: vec![
                    SimulationYear::empty(118, 10.0),
                    SimulationYear::empty(119, 20.0),
                    SimulationYear::empty(120, 0.0),
                ],
                age_at_depletion: 120,
                percentile: 0.0,
            },
            SimulationResult {
                trajectory: vec![
                    SimulationYear::empty(118, 30.0),
                    SimulationYear::empty(119, 40.0),
                    SimulationYear::empty(120, 50.0),
                ],
                age_at_depletion: NEVER_DEPLETED,
                percentile: 100.0,
            },
        ];
        let bands = yearly_bands(&Batch::new(118, trials), &[50.0]).unwrap();
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[0].age, 118);
        assert_approx(bands[0].values[0], 20.0);
        assert_approx(bands[1].values[0], 30.0);
        assert_approx(bands[2].values[0], 25.0);
        assert!(yearly_bands(&Batch::new(65, Vec::new()), &[50.0]).is_err());
    }

    #[test]
    fn survival_curve_excludes_ages_beyond_max() {
        let ages = [2, 2, 3, NEVER_DEPLETED];
        let pmf = depletion_probability_distribution(&ages, 5).unwrap();
        assert_eq!(pmf, vec![0.0, 0.0, 0.5, 0.25, 0.0]);

        let survival = survival_probability_curve(&ages, 5).unwrap();
        assert_eq!(survival.len(), 5);
        assert_approx(survival[0], 1.0);
        assert_approx(survival[1], 1.0);
        assert_approx(survival[2], 0.5);
        assert_approx(survival[3], 0.25);
        assert_approx(survival[4], 0.25);
    }

    #[test]
    fn survival_curve_ignores_depletion_exactly_at_max_age() {
        let survival = survival_probability_curve(&[MAX_AGE, MAX_AGE], MAX_AGE).unwrap();
        assert_eq!(survival.len(), MAX_AGE as usize);
        assert!(survival.iter().all(|&p| p == 1.0));
    }

    #[test]
    fn survival_curve_rejects_empty_input() {
        assert!(survival_probability_curve(&[], MAX_AGE).is_err());
        assert!(survival_probability_curve(&[3], 0).is_err());
    }

    #[test]
    fn survival_curve_slices_from_retirement() {
        let curve = SurvivalCurve::new(&[70, 80, NEVER_DEPLETED, NEVER_DEPLETED], MAX_AGE).unwrap();
        let tail = curve.from_age(65);
        assert_eq!(tail.ages.first(), Some(&65));
        assert_eq!(tail.ages.last(), Some(&(MAX_AGE - 1)));
        assert_eq!(tail.ages.len(), tail.probabilities.len());
        assert_approx(tail.probabilities[0], 1.0);
        assert_approx(tail.probabilities[70 - 65], 0.75);
        assert_approx(tail.probabilities[80 - 65], 0.5);
        assert!(curve.from_age(500).ages.is_empty());
    }

    #[test]
    fn bin_width_rounds_quarter_median_to_unit() {
        // floor-median of [1.0M, 1.3M, 2.0M] is 1.3M; a quarter is 325k -> 300k.
        let width = derive_bin_width(&[2_000_000.0, 1_000_000.0, 1_300_000.0]).unwrap();
        assert_approx(width, 300_000.0);
    }

    #[test]
    fn bin_width_never_drops_below_one_unit() {
        // A quarter median of 10 rounds to zero units; the floor keeps binning meaningful.
        assert_approx(derive_bin_width(&[0.0, 10.0]).unwrap(), BIN_WIDTH_UNIT);
        assert_approx(derive_bin_width(&[0.0, 0.0, 0.0]).unwrap(), BIN_WIDTH_UNIT);
        assert_approx(derive_bin_width(&[190_000.0]).unwrap(), BIN_WIDTH_UNIT);

        let hist = histogram(&[0.0, 10.0, 150_000.0], derive_bin_width(&[0.0, 10.0]).unwrap(), 4)
            .unwrap();
        assert_eq!(hist.counts, vec![2, 1, 0, 0]);
    }

    #[test]
    fn histogram_clamps_overflow_into_last_bin() {
        let values = [0.0, 50.0, 99.9, 100.0, 250.0, 299.9, 300.0, 10_000.0];
        let hist = histogram(&values, 100.0, 4).unwrap();
        assert_eq!(hist.counts, vec![3, 1, 2, 2]);
        assert_approx(hist.probabilities.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn histogram_rejects_bad_width() {
        assert!(histogram(&[1.0], 0.0, HISTOGRAM_BINS).is_err());
        assert!(histogram(&[1.0], f64::INFINITY, HISTOGRAM_BINS).is_err());
        assert!(histogram(&[1.0], 100.0, 0).is_err());
        assert!(histogram(&[], 100.0, HISTOGRAM_BINS).is_err());
    }

    proptest! {
        #[test]
        fn prop_survival_curve_is_non_increasing_and_bounded(
            ages in vec(0u32..=NEVER_DEPLETED, 1..300)
        ) {
            let curve = survival_probability_curve(&ages, MAX_AGE).unwrap();
            prop_assert!(curve.iter().all(|p| (0.0..=1.0).contains(p)));
            prop_assert!(curve.windows(2).all(|w| w[1] <= w[0] + 1e-12));
        }

        #[test]
        fn prop_histogram_probabilities_sum_to_one(
            values in vec(0.0f64..5_000_000.0, 1..400)
        ) {
            let width = derive_bin_width(&values).unwrap();
            let hist = histogram(&values, width, HISTOGRAM_BINS).unwrap();
            let total: f64 = hist.probabilities.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert!(hist.counts.iter().sum::<u32>() as usize == values.len());
        }

        #[test]
        fn prop_cutpoints_stay_within_range(
            values in vec(-1e6f64..1e6, 1..200),
            p in 0.0f64..=100.0,
        ) {
            let cut = percentile_cutpoints(&values, &[p]).unwrap()[0];
            let floor = floor_percentiles(&values, &[p]).unwrap()[0];
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(cut >= min - 1e-9 && cut <= max + 1e-9);
            prop_assert!(floor >= min && floor <= max);
        }
    }
}
