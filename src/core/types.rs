use serde::Serialize;

use super::error::{SimError, SimResult, ensure_finite};

pub const MAX_AGE: u32 = 120;
pub const NEVER_DEPLETED: u32 = MAX_AGE + 1;
pub const GROWTH_VARIANCE: f64 = 0.04;
// No lower cap.
pub const GROWTH_CAP: f64 = 0.20;
pub const WITHDRAWAL_INFLATION: f64 = 0.02;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accumulating,
    Withdrawing,
    Depleted,
}

impl Phase {
    pub fn at(age: u32, retirement_age: u32) -> Self {
        if age <= retirement_age {
            Phase::Accumulating
        } else {
            Phase::Withdrawing
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub start_amount: f64,
    pub annual_savings: f64,
    pub annual_withdrawal: f64,
    pub growth_rate: f64,
    pub current_age: u32,
    pub retirement_age: u32,
    pub trial_count: u32,
    pub seed: u64,
}

impl SimulationParams {
    pub fn validate(&self) -> SimResult<()> {
        for (name, value) in [
            ("start_amount", self.start_amount),
            ("annual_savings", self.annual_savings),
            ("annual_withdrawal", self.annual_withdrawal),
        ] {
            if ensure_finite(name, value)? < 0.0 {
                return Err(SimError::invalid(name, format!("must be >= 0, got {value}")));
            }
        }
        ensure_finite("growth_rate", self.growth_rate)?;

        if self.current_age > MAX_AGE {
            return Err(SimError::invalid(
                "current_age",
                format!("must be <= {MAX_AGE}, got {}", self.current_age),
            ));
        }
        if self.retirement_age > MAX_AGE {
            return Err(SimError::invalid(
                "retirement_age",
                format!("must be <= {MAX_AGE}, got {}", self.retirement_age),
            ));
        }
        if self.trial_count == 0 {
            return Err(SimError::invalid("trial_count", "must be > 0"));
        }
        Ok(())
    }

    pub fn years_to_retirement(&self) -> u32 {
        self.retirement_age.saturating_sub(self.current_age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationYear {
    pub age: u32,
    pub account_value: f64,
    pub annual_growth_nom: f64,
    pub annual_growth_perc: f64,
    pub annual_saving: f64,
    pub annual_withdrawal: f64,
}

impl SimulationYear {
    pub fn empty(age: u32, account_value: f64) -> Self {
        Self {
            age,
            account_value,
            annual_growth_nom: 0.0,
            annual_growth_perc: 0.0,
            annual_saving: 0.0,
            annual_withdrawal: 0.0,
        }
    }

    pub fn phase(&self, retirement_age: u32) -> Phase {
        if self.account_value <= 0.0 {
            Phase::Depleted
        } else {
            Phase::at(self.age, retirement_age)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub trajectory: Vec<SimulationYear>,
    pub age_at_depletion: u32,
    pub percentile: f64,
}

impl SimulationResult {
    // 0 when the trajectory has no such year.
    pub fn value_at(&self, age: u32) -> f64 {
        let Some(first) = self.trajectory.first() else {
            return 0.0;
        };
        age.checked_sub(first.age)
            .and_then(|idx| self.trajectory.get(idx as usize))
            .map_or(0.0, |year| year.account_value)
    }

    // An account overdrawn in its final year still reports NEVER_DEPLETED, so the
    // balance decides.
    pub fn depleted(&self) -> bool {
        self.trajectory
            .last()
            .is_some_and(|year| year.account_value <= 0.0)
    }
}

// Trials in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    retirement_age: u32,
    trials: Vec<SimulationResult>,
}

impl Batch {
    pub(crate) fn new(retirement_age: u32, trials: Vec<SimulationResult>) -> Self {
        Self {
            retirement_age,
            trials,
        }
    }

    pub fn trials(&self) -> &[SimulationResult] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn success_rate(&self) -> f64 {
        if self.trials.is_empty() {
            return 0.0;
        }
        let survivors = self.trials.iter().filter(|t| !t.depleted()).count();
        survivors as f64 / self.trials.len() as f64
    }

    pub fn retirement_age(&self) -> u32 {
        self.retirement_age
    }

    pub fn retirement_values(&self) -> Vec<f64> {
        self.trials
            .iter()
            .map(|trial| trial.value_at(self.retirement_age))
            .collect()
    }

    pub fn depletion_ages(&self) -> Vec<u32> {
        self.trials.iter().map(|trial| trial.age_at_depletion).collect()
    }

    pub fn into_trials(self) -> Vec<SimulationResult> {
        self.trials
    }
}
