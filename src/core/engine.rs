use std::time::Instant;

use rand::Rng;
use rand::distr::Distribution;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::analytics::assign_percentiles;
use super::error::SimResult;
use super::random::{NormalVariate, trial_rng};
use super::types::{
    Batch, GROWTH_CAP, GROWTH_VARIANCE, MAX_AGE, SimulationParams, SimulationResult,
    SimulationYear, WITHDRAWAL_INFLATION,
};

// Trial `i` draws from `trial_rng(params.seed, i)`, so parallel and sequential runs match.
pub fn simulate(params: &SimulationParams) -> SimResult<Batch> {
    params.validate()?;
    let growth = NormalVariate::new(params.growth_rate, GROWTH_VARIANCE)?;

    let started = Instant::now();
    let mut trials = run_trials(params, &growth);
    assign_percentiles(&mut trials, params.retirement_age)?;

    tracing::debug!(
        trials = trials.len(),
        seed = params.seed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulated batch"
    );
    Ok(Batch::new(params.retirement_age, trials))
}

#[cfg(feature = "parallel")]
fn run_trials(params: &SimulationParams, growth: &NormalVariate) -> Vec<SimulationResult> {
    (0..params.trial_count)
        .into_par_iter()
        .map(|trial_id| {
            let mut rng = trial_rng(params.seed, trial_id);
            simulate_trial(params, growth, &mut rng)
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_trials(params: &SimulationParams, growth: &NormalVariate) -> Vec<SimulationResult> {
    (0..params.trial_count)
        .map(|trial_id| {
            let mut rng = trial_rng(params.seed, trial_id);
            simulate_trial(params, growth, &mut rng)
        })
        .collect()
}

pub fn simulate_trial<R: Rng + ?Sized>(
    params: &SimulationParams,
    growth: &NormalVariate,
    rng: &mut R,
) -> SimulationResult {
    let year_count = (MAX_AGE + 1).saturating_sub(params.current_age) as usize;
    let mut trajectory = Vec::with_capacity(year_count);
    trajectory.push(SimulationYear::empty(params.current_age, params.start_amount));

    let mut age = params.current_age + 1;
    let mut current_needs = params.annual_withdrawal * (1.0 + WITHDRAWAL_INFLATION);
    let mut value_eop = params.start_amount;

    while value_eop > 0.0 && age <= MAX_AGE {
        let value_bop = value_eop;
        let account_change = if age <= params.retirement_age {
            params.annual_savings
        } else {
            -current_needs
        };
        let rate = growth.sample(rng).min(GROWTH_CAP);
        value_eop = value_bop + value_bop * rate + account_change;

        trajectory.push(SimulationYear {
            age,
            account_value: value_eop.max(0.0),
            annual_growth_nom: value_eop - value_bop - account_change,
            annual_growth_perc: rate,
            annual_saving: account_change.max(0.0),
            annual_withdrawal: account_change.min(0.0),
        });

        age += 1;
        current_needs *= 1.0 + WITHDRAWAL_INFLATION;
    }

    // Loop-exit age: one past the overdrawn year, NEVER_DEPLETED when the bound ended it.
    let age_at_depletion = age;
    trajectory.extend((age..=MAX_AGE).map(|pad_age| SimulationYear::empty(pad_age, 0.0)));

    SimulationResult {
        trajectory,
        age_at_depletion,
        percentile: 0.0,
    }
}
