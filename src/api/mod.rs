use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    MAX_AGE, SimulationParams, SimulationReport, SimulationResult, SimulationYear,
    TrajectorySummary, decile_members, simulate,
};

#[derive(Debug, Parser)]
#[command(
    name = "retire-sim",
    about = "Monte Carlo retirement account simulator (stochastic growth, inflating withdrawals)"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level for retire_sim targets; RUST_LOG overrides"
    )]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one batch and print the JSON report to stdout.
    Run {
        #[command(flatten)]
        args: SimulateArgs,
        #[arg(long, help = "Include every trial's trajectory in the output")]
        include_trajectories: bool,
        #[arg(long, help = "List trial indices in this decile (0-9)")]
        decile: Option<u8>,
        #[arg(long, help = "Pretty-print the JSON output")]
        pretty: bool,
    },
    /// Serve the JSON API.
    Serve {
        #[arg(long, env = "RETIRE_SIM_PORT", default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    #[arg(long, default_value_t = 100_000.0)]
    start_amount: f64,
    #[arg(
        long,
        default_value_t = 10_000.0,
        help = "Saved at the end of every year up to and including retirement age"
    )]
    annual_savings: f64,
    #[arg(
        long,
        default_value_t = 50_000.0,
        help = "Withdrawal need in today's money; grows 2% a year"
    )]
    annual_withdrawal: f64,
    #[arg(long, default_value_t = 5.0, help = "Expected annual growth in percent, e.g. 5")]
    growth_rate: f64,
    #[arg(long, default_value_t = 30)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(long, default_value_t = 1_000)]
    simulations: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            start_amount: 100_000.0,
            annual_savings: 10_000.0,
            annual_withdrawal: 50_000.0,
            growth_rate: 5.0,
            current_age: 30,
            retirement_age: 65,
            simulations: 1_000,
            seed: 42,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    start_amount: Option<f64>,
    annual_savings: Option<f64>,
    annual_withdrawal: Option<f64>,
    growth_rate: Option<f64>,
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    simulations: Option<u32>,
    seed: Option<u64>,

    include_trajectories: Option<bool>,
    decile: Option<u8>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct ApiOptions {
    include_trajectories: bool,
    decile: Option<u8>,
}

#[derive(Debug)]
struct ApiRequest {
    params: SimulationParams,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrialView {
    index: usize,
    percentile: f64,
    age_at_depletion: u32,
    summary: TrajectorySummary,
    trajectory: Vec<SimulationYear>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    params: SimulationParams,
    report: SimulationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    decile: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decile_trials: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trials: Option<Vec<TrialView>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_params(args: SimulateArgs) -> Result<SimulationParams, String> {
    for (flag, value) in [
        ("--start-amount", args.start_amount),
        ("--annual-savings", args.annual_savings),
        ("--annual-withdrawal", args.annual_withdrawal),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{flag} must be >= 0"));
        }
    }

    if !args.growth_rate.is_finite() || args.growth_rate <= -100.0 {
        return Err("--growth-rate must be > -100".to_string());
    }

    if args.current_age > MAX_AGE {
        return Err(format!("--current-age must be <= {MAX_AGE}"));
    }

    if args.retirement_age > MAX_AGE {
        return Err(format!("--retirement-age must be <= {MAX_AGE}"));
    }

    if args.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    let params = SimulationParams {
        start_amount: args.start_amount,
        annual_savings: args.annual_savings,
        annual_withdrawal: args.annual_withdrawal,
        growth_rate: args.growth_rate / 100.0,
        current_age: args.current_age,
        retirement_age: args.retirement_age,
        trial_count: args.simulations,
        seed: args.seed,
    };
    params.validate().map_err(|e| e.to_string())?;
    Ok(params)
}

pub fn run_cli(
    args: SimulateArgs,
    include_trajectories: bool,
    decile: Option<u8>,
    pretty: bool,
) -> Result<String, String> {
    let request = ApiRequest {
        params: build_params(args)?,
        options: ApiOptions {
            include_trajectories,
            decile,
        },
    };
    let response = build_simulate_response(&request)?;
    let json = if pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    };
    json.map_err(|e| format!("failed to serialize report: {e}"))
}

pub fn router() -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "retirement simulator API listening");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            tracing::debug!(error = %msg, "rejected simulate request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    let trials = request.params.trial_count;
    match tokio::task::spawn_blocking(move || build_simulate_response(&request)).await {
        Ok(Ok(response)) => {
            tracing::info!(trials, "simulate request served");
            json_response(StatusCode::OK, response)
        }
        Ok(Err(msg)) => error_response(StatusCode::BAD_REQUEST, &msg),
        Err(e) => {
            tracing::error!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut args = SimulateArgs::default();
    let mut options = ApiOptions::default();

    if let Some(v) = payload.start_amount {
        args.start_amount = v;
    }
    if let Some(v) = payload.annual_savings {
        args.annual_savings = v;
    }
    if let Some(v) = payload.annual_withdrawal {
        args.annual_withdrawal = v;
    }
    if let Some(v) = payload.growth_rate {
        args.growth_rate = v;
    }
    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        args.retirement_age = v;
    }
    if let Some(v) = payload.simulations {
        args.simulations = v;
    }
    if let Some(v) = payload.seed {
        args.seed = v;
    }

    if let Some(v) = payload.include_trajectories {
        options.include_trajectories = v;
    }
    if let Some(v) = payload.decile {
        if v > 9 {
            return Err("--decile must be between 0 and 9".to_string());
        }
        options.decile = Some(v);
    }

    let params = build_params(args)?;
    Ok(ApiRequest { params, options })
}

fn build_simulate_response(request: &ApiRequest) -> Result<SimulateResponse, String> {
    let params = &request.params;
    let batch = simulate(params).map_err(|e| e.to_string())?;
    let report = SimulationReport::build(params, &batch).map_err(|e| e.to_string())?;

    let decile_trials = request
        .options
        .decile
        .map(|d| decile_members(&batch, d))
        .transpose()
        .map_err(|e| e.to_string())?;

    let trials = request.options.include_trajectories.then(|| {
        batch
            .into_trials()
            .into_iter()
            .enumerate()
            .map(|(index, trial)| trial_view(index, trial, params))
            .collect()
    });

    Ok(SimulateResponse {
        params: params.clone(),
        report,
        decile: request.options.decile,
        decile_trials,
        trials,
    })
}

fn trial_view(index: usize, trial: SimulationResult, params: &SimulationParams) -> TrialView {
    let summary = TrajectorySummary::new(&trial, params.current_age, params.retirement_age);
    TrialView {
        index,
        percentile: trial.percentile,
        age_at_depletion: trial.age_at_depletion,
        summary,
        trajectory: trial.trajectory,
    }
}
