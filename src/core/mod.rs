mod analytics;
mod engine;
mod error;
mod projection;
mod random;
mod summary;
mod types;

pub use analytics::{
    BIN_WIDTH_UNIT, HISTOGRAM_BINS, Histogram, SurvivalCurve, YearBand, assign_percentiles,
    decile_members, depletion_probability_distribution, derive_bin_width, floor_percentiles,
    histogram, percentile_cutpoints, percentile_rank, survival_probability_curve, yearly_bands,
};
pub use engine::{simulate, simulate_trial};
pub use error::{SimError, SimResult};
pub use projection::expected_value;
pub use random::{LogNormalVariate, NormalVariate, derive_seed, lognormal, normal, trial_rng};
pub use summary::{
    BAND_PERCENTILES, LADDER_PERCENTILES, PercentilePoint, SimulationReport, TrajectorySummary,
};
pub use types::{
    Batch, GROWTH_CAP, GROWTH_VARIANCE, MAX_AGE, NEVER_DEPLETED, Phase, SimulationParams,
    SimulationResult, SimulationYear, WITHDRAWAL_INFLATION,
};
