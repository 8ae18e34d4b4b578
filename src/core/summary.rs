use serde::Serialize;

use super::analytics::{
    HISTOGRAM_BINS, Histogram, SurvivalCurve, YearBand, derive_bin_width, floor_percentiles,
    histogram, percentile_cutpoints, yearly_bands,
};
use super::error::{SimError, SimResult};
use super::projection::expected_value;
use super::types::{Batch, MAX_AGE, SimulationParams, SimulationResult};

// Ladder, mean and bin width run over every trial's retirement value, zeros included,
// so trials already depleted by retirement pull the low rungs to 0.
pub const LADDER_PERCENTILES: [f64; 11] =
    [0.1, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 99.9];
pub const BAND_PERCENTILES: [f64; 3] = [10.0, 50.0, 90.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySummary {
    pub starting_value: f64,
    pub total_growth_nominal: f64,
    pub total_savings: f64,
    pub avg_growth_before_retirement: Option<f64>,
    pub first_retirement_year_value: Option<f64>,
    pub first_withdrawal: Option<f64>,
    pub years_before_depletion: u32,
    pub avg_growth_after_retirement: Option<f64>,
}

impl TrajectorySummary {
    pub fn new(result: &SimulationResult, current_age: u32, retirement_age: u32) -> Self {
        let trajectory = &result.trajectory;
        let starting_value = trajectory.first().map_or(0.0, |y| y.account_value);

        let accumulation = || trajectory.iter().filter(|y| y.age <= retirement_age);
        let total_growth_nominal: f64 = accumulation().map(|y| y.annual_growth_nom).sum();
        let total_savings: f64 = trajectory.iter().map(|y| y.annual_saving).sum();
        let accumulation_years = retirement_age.saturating_sub(current_age);
        let avg_growth_before_retirement = geometric_mean_growth(
            accumulation().map(|y| y.annual_growth_perc),
            accumulation_years,
        );

        let first_retirement_year = trajectory.iter().find(|y| y.age > retirement_age);
        let retired: Vec<_> = trajectory.iter().filter(|y| y.age > retirement_age).collect();
        let years_before_depletion = retired
            .iter()
            .position(|y| y.account_value <= 0.0)
            .map_or(MAX_AGE.saturating_sub(retirement_age), |idx| idx as u32);
        let avg_growth_after_retirement = geometric_mean_growth(
            retired.iter().map(|y| y.annual_growth_perc),
            years_before_depletion,
        );

        Self {
            starting_value,
            total_growth_nominal,
            total_savings,
            avg_growth_before_retirement,
            first_retirement_year_value: first_retirement_year.map(|y| y.account_value),
            first_withdrawal: first_retirement_year.map(|y| y.annual_withdrawal),
            years_before_depletion,
            avg_growth_after_retirement,
        }
    }
}

fn geometric_mean_growth(rates: impl Iterator<Item = f64>, years: u32) -> Option<f64> {
    if years == 0 {
        return None;
    }
    let product: f64 = rates.map(|r| 1.0 + r).product();
    Some(product.powf(1.0 / years as f64) - 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentilePoint {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub trial_count: usize,
    pub retirement_age: u32,
    pub success_rate: f64,
    pub mean_retirement_value: f64,
    pub median_retirement_value: f64,
    pub p10_retirement_value: f64,
    pub p90_retirement_value: f64,
    pub p95_retirement_value: f64,
    pub expected_retirement_value: f64,
    pub percentile_ladder: Vec<PercentilePoint>,
    pub survival: SurvivalCurve,
    pub histogram: Histogram,
    pub yearly_bands: Vec<YearBand>,
}

impl SimulationReport {
    pub fn build(params: &SimulationParams, batch: &Batch) -> SimResult<Self> {
        if batch.is_empty() {
            return Err(SimError::EmptyInput { what: "report" });
        }
        let values = batch.retirement_values();

        let ladder = floor_percentiles(&values, &LADDER_PERCENTILES)?;
        let percentile_ladder = LADDER_PERCENTILES
            .iter()
            .zip(ladder)
            .map(|(&percentile, value)| PercentilePoint { percentile, value })
            .collect();

        let cuts = percentile_cutpoints(&values, &[10.0, 50.0, 90.0, 95.0])?;
        let bin_width = derive_bin_width(&values)?;
        let survival = SurvivalCurve::new(&batch.depletion_ages(), MAX_AGE)?
            .from_age(batch.retirement_age());

        Ok(Self {
            trial_count: batch.len(),
            retirement_age: batch.retirement_age(),
            success_rate: batch.success_rate(),
            mean_retirement_value: values.iter().sum::<f64>() / values.len() as f64,
            median_retirement_value: cuts[1],
            p10_retirement_value: cuts[0],
            p90_retirement_value: cuts[2],
            p95_retirement_value: cuts[3],
            expected_retirement_value: expected_value(
                params.start_amount,
                params.annual_savings,
                params.years_to_retirement(),
                params.growth_rate,
            ),
            percentile_ladder,
            survival,
            histogram: histogram(&values, bin_width, HISTOGRAM_BINS)?,
            yearly_bands: yearly_bands(batch, &BAND_PERCENTILES)?,
        })
    }
}
