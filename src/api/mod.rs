use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    CandidateScore, EnsembleResult, MilestoneTable, ReturnModel, SimulationConfig, optimize,
    run_policy_comparison,
};

const DEFAULT_MILESTONES: [f64; 6] = [50_000.0, 60_000.0, 70_000.0, 80_000.0, 90_000.0, 100_000.0];
const DEFAULT_TAKE_PROFITS: [f64; 6] = [1_000.0, 2_000.0, 3_000.0, 4_000.0, 5_000.0, 10_000.0];

const DEFAULT_MILESTONE_GRID: [[f64; 6]; 3] = [
    [50_000.0, 60_000.0, 70_000.0, 80_000.0, 90_000.0, 100_000.0],
    [52_000.0, 64_000.0, 76_000.0, 88_000.0, 100_000.0, 112_000.0],
    [48_000.0, 58_000.0, 68_000.0, 78_000.0, 88_000.0, 98_000.0],
];
const DEFAULT_TAKE_PROFIT_GRID: [[f64; 6]; 3] = [
    [1_000.0, 2_000.0, 3_000.0, 4_000.0, 5_000.0, 10_000.0],
    [1_500.0, 2_500.0, 3_500.0, 4_500.0, 5_500.0, 12_000.0],
    [800.0, 1_800.0, 2_800.0, 3_800.0, 4_800.0, 9_000.0],
];

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliReturnModel {
    Lognormal,
    Arithmetic,
    StudentT,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiReturnModel {
    #[serde(alias = "logNormal", alias = "log_normal")]
    Lognormal,
    #[serde(alias = "arithmeticNormal", alias = "arithmetic_normal")]
    Arithmetic,
    #[serde(alias = "studentT", alias = "student_t")]
    StudentT,
}

impl From<ApiReturnModel> for CliReturnModel {
    fn from(value: ApiReturnModel) -> Self {
        match value {
            ApiReturnModel::Lognormal => CliReturnModel::Lognormal,
            ApiReturnModel::Arithmetic => CliReturnModel::Arithmetic,
            ApiReturnModel::StudentT => CliReturnModel::StudentT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumberList {
    Values(Vec<f64>),
    Csv(String),
}

impl NumberList {
    fn resolve(&self, flag: &str) -> Result<Vec<f64>, String> {
        match self {
            Self::Values(values) => Ok(values.clone()),
            Self::Csv(text) => text
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<f64>()
                        .map_err(|_| format!("{flag} contains a non-numeric entry: {part}"))
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    #[serde(alias = "initial")]
    initial_portfolio: Option<f64>,
    #[serde(alias = "target")]
    target_portfolio: Option<f64>,
    years: Option<u32>,
    days_per_year: Option<u32>,
    simulations: Option<u32>,
    seed: Option<u64>,
    annual_return: Option<f64>,
    annual_volatility: Option<f64>,
    return_model: Option<ApiReturnModel>,
    student_t_df: Option<f64>,
    drawdown_trigger: Option<f64>,
    reinvest_fraction: Option<f64>,
    milestones: Option<NumberList>,
    take_profits: Option<NumberList>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OptimizePayload {
    #[serde(flatten)]
    base: SimulatePayload,
    milestone_grid: Option<Vec<Vec<f64>>>,
    take_profit_grid: Option<Vec<Vec<f64>>>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "takeprofit",
    about = "Monte Carlo take-profit simulator (milestone extraction + drawdown-triggered reinvestment)"
)]
pub struct Cli {
    #[arg(long, default_value_t = 45_000.0)]
    initial_portfolio: f64,
    #[arg(long, default_value_t = 110_000.0)]
    target_portfolio: f64,
    #[arg(long, default_value_t = 5, help = "Simulation horizon in years")]
    years: u32,
    #[arg(long, default_value_t = 365, help = "Simulated days per year")]
    days_per_year: u32,
    #[arg(long, default_value_t = 200, help = "Independent paths per ensemble")]
    simulations: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 15.0, help = "Expected annual return in percent")]
    annual_return: f64,
    #[arg(long, default_value_t = 20.0, help = "Annual return volatility in percent")]
    annual_volatility: f64,
    #[arg(long, value_enum, default_value_t = CliReturnModel::Lognormal)]
    return_model: CliReturnModel,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Degrees of freedom for the student-t return model"
    )]
    student_t_df: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Drawdown from peak that triggers reinvestment, in percent"
    )]
    drawdown_trigger: f64,
    #[arg(
        long,
        default_value_t = 50.0,
        help = "Share of the reserve reinvested on a drawdown day, in percent"
    )]
    reinvest_fraction: f64,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_MILESTONES,
        help = "Milestone thresholds, comma separated"
    )]
    milestones: Vec<f64>,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_TAKE_PROFITS,
        help = "Take-profit amounts, comma separated, one per milestone"
    )]
    take_profits: Vec<f64>,
    #[arg(
        long,
        help = "Grid-search the built-in candidate tables instead of running one ensemble"
    )]
    optimize: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnomalyReport {
    path: usize,
    day: u32,
    value: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnsembleReport {
    mean_path: Vec<f64>,
    terminal_values: Vec<f64>,
    mean_terminal: f64,
    median_terminal: f64,
    p10_terminal: f64,
    target_hit_rate: f64,
    anomalous_paths: u32,
    anomalies: Vec<AnomalyReport>,
}

impl EnsembleReport {
    fn from_ensemble(ensemble: &EnsembleResult) -> Self {
        let anomalies = ensemble
            .paths
            .iter()
            .enumerate()
            .filter_map(|(path, result)| {
                result.anomaly.map(|anomaly| AnomalyReport {
                    path,
                    day: anomaly.day,
                    value: anomaly.value,
                })
            })
            .collect();

        Self {
            mean_path: ensemble.mean_path.clone(),
            terminal_values: ensemble.terminal_values.clone(),
            mean_terminal: ensemble.mean_terminal,
            median_terminal: ensemble.median_terminal,
            p10_terminal: ensemble.p10_terminal,
            target_hit_rate: ensemble.target_hit_rate,
            anomalous_paths: ensemble.anomalous_paths,
            anomalies,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    horizon_days: u32,
    simulations: u32,
    seed: u64,
    target_portfolio: f64,
    with_policy: EnsembleReport,
    without_policy: EnsembleReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeResponse {
    horizon_days: u32,
    simulations: u32,
    seed: u64,
    best_milestones: Vec<f64>,
    best_take_profits: Vec<f64>,
    best_mean_terminal: f64,
    best_target_hit_rate: f64,
    scores: Vec<CandidateScore>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_config(cli: &Cli) -> Result<SimulationConfig, String> {
    if !cli.initial_portfolio.is_finite() || cli.initial_portfolio <= 0.0 {
        return Err("--initial-portfolio must be > 0".to_string());
    }

    if !cli.target_portfolio.is_finite() || cli.target_portfolio <= 0.0 {
        return Err("--target-portfolio must be > 0".to_string());
    }

    if cli.years == 0 {
        return Err("--years must be > 0".to_string());
    }

    if cli.days_per_year == 0 {
        return Err("--days-per-year must be > 0".to_string());
    }

    if cli.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if !cli.annual_return.is_finite() {
        return Err("--annual-return must be finite".to_string());
    }

    if !cli.annual_volatility.is_finite() || cli.annual_volatility < 0.0 {
        return Err("--annual-volatility must be >= 0".to_string());
    }

    if !(0.0..=100.0).contains(&cli.drawdown_trigger) || cli.drawdown_trigger == 0.0 {
        return Err("--drawdown-trigger must be between 0 (exclusive) and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.reinvest_fraction) {
        return Err("--reinvest-fraction must be between 0 and 100".to_string());
    }

    if cli.return_model == CliReturnModel::StudentT
        && (!cli.student_t_df.is_finite() || cli.student_t_df <= 2.0)
    {
        return Err("--student-t-df must be > 2".to_string());
    }

    let milestones = MilestoneTable::from_pairs(&cli.milestones, &cli.take_profits)
        .map_err(|e| format!("--milestones/--take-profits: {e}"))?;

    let days_per_year = cli.days_per_year as f64;
    let daily_mu = cli.annual_return / 100.0 / days_per_year;
    let daily_sigma = cli.annual_volatility / 100.0 / days_per_year.sqrt();

    let return_model = match cli.return_model {
        CliReturnModel::Lognormal => ReturnModel::Lognormal {
            daily_mu,
            daily_sigma,
        },
        CliReturnModel::Arithmetic => ReturnModel::ArithmeticNormal {
            daily_mu,
            daily_sigma,
        },
        CliReturnModel::StudentT => ReturnModel::StudentT {
            df: cli.student_t_df,
            daily_mu,
            daily_sigma,
        },
    };

    let config = SimulationConfig {
        initial_value: cli.initial_portfolio,
        target_value: cli.target_portfolio,
        horizon_days: cli.years * cli.days_per_year,
        num_paths: cli.simulations,
        drawdown_trigger: cli.drawdown_trigger / 100.0,
        reinvest_fraction: cli.reinvest_fraction / 100.0,
        milestones,
        return_model,
        seed: cli.seed,
    };
    config.validate().map_err(|e| e.to_string())?;

    Ok(config)
}

fn default_grid(rows: &[[f64; 6]]) -> Vec<Vec<f64>> {
    rows.iter().map(|row| row.to_vec()).collect()
}

pub fn run_cli() -> Result<(), String> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let report = if cli.optimize {
        let result = optimize(
            &config,
            &default_grid(&DEFAULT_MILESTONE_GRID),
            &default_grid(&DEFAULT_TAKE_PROFIT_GRID),
            config.num_paths,
        )
        .map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&build_optimize_response(&config, result))
    } else {
        let comparison =
            run_policy_comparison(&config, config.num_paths).map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&build_simulate_response(&config, &comparison))
    }
    .map_err(|e| format!("failed to serialize report: {e}"))?;

    println!("{report}");
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/optimize", post(optimize_post_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("take-profit HTTP API listening on http://{addr}");

    axum::serve(listener, app).await
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
    let config = match config_from_payload(&payload) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let comparison = match run_policy_comparison(&config, config.num_paths) {
        Ok(comparison) => comparison,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    json_response(
        StatusCode::OK,
        build_simulate_response(&config, &comparison),
    )
}

async fn optimize_post_handler(Json(payload): Json<OptimizePayload>) -> Response {
    let config = match config_from_payload(&payload.base) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let milestone_grid = payload
        .milestone_grid
        .unwrap_or_else(|| default_grid(&DEFAULT_MILESTONE_GRID));
    let take_profit_grid = payload
        .take_profit_grid
        .unwrap_or_else(|| default_grid(&DEFAULT_TAKE_PROFIT_GRID));

    match optimize(&config, &milestone_grid, &take_profit_grid, config.num_paths) {
        Ok(result) => json_response(StatusCode::OK, build_optimize_response(&config, result)),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
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

fn config_from_payload(payload: &SimulatePayload) -> Result<SimulationConfig, String> {
    let mut cli = default_cli_for_api();

    if let Some(initial_portfolio) = payload.initial_portfolio {
        cli.initial_portfolio = initial_portfolio;
    }
    if let Some(target_portfolio) = payload.target_portfolio {
        cli.target_portfolio = target_portfolio;
    }
    if let Some(years) = payload.years {
        cli.years = years;
    }
    if let Some(days_per_year) = payload.days_per_year {
        cli.days_per_year = days_per_year;
    }
    if let Some(simulations) = payload.simulations {
        cli.simulations = simulations;
    }
    if let Some(seed) = payload.seed {
        cli.seed = seed;
    }
    if let Some(annual_return) = payload.annual_return {
        cli.annual_return = annual_return;
    }
    if let Some(annual_volatility) = payload.annual_volatility {
        cli.annual_volatility = annual_volatility;
    }
    if let Some(return_model) = payload.return_model {
        cli.return_model = return_model.into();
    }
    if let Some(student_t_df) = payload.student_t_df {
        cli.student_t_df = student_t_df;
    }
    if let Some(drawdown_trigger) = payload.drawdown_trigger {
        cli.drawdown_trigger = drawdown_trigger;
    }
    if let Some(reinvest_fraction) = payload.reinvest_fraction {
        cli.reinvest_fraction = reinvest_fraction;
    }
    if let Some(milestones) = &payload.milestones {
        cli.milestones = milestones.resolve("milestones")?;
    }
    if let Some(take_profits) = &payload.take_profits {
        cli.take_profits = take_profits.resolve("takeProfits")?;
    }

    build_config(&cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        initial_portfolio: 45_000.0,
        target_portfolio: 110_000.0,
        years: 5,
        days_per_year: 365,
        simulations: 200,
        seed: 42,
        annual_return: 15.0,
        annual_volatility: 20.0,
        return_model: CliReturnModel::Lognormal,
        student_t_df: 4.0,
        drawdown_trigger: 5.0,
        reinvest_fraction: 50.0,
        milestones: DEFAULT_MILESTONES.to_vec(),
        take_profits: DEFAULT_TAKE_PROFITS.to_vec(),
        optimize: false,
    }
}

fn build_simulate_response(
    config: &SimulationConfig,
    comparison: &crate::core::ComparisonResult,
) -> SimulateResponse {
    SimulateResponse {
        horizon_days: config.horizon_days,
        simulations: config.num_paths,
        seed: config.seed,
        target_portfolio: config.target_value,
        with_policy: EnsembleReport::from_ensemble(&comparison.with_policy),
        without_policy: EnsembleReport::from_ensemble(&comparison.without_policy),
    }
}

fn build_optimize_response(
    config: &SimulationConfig,
    result: crate::core::OptimizationResult,
) -> OptimizeResponse {
    let best = result.best().clone();
    OptimizeResponse {
        horizon_days: config.horizon_days,
        simulations: config.num_paths,
        seed: config.seed,
        best_milestones: best.milestone_thresholds,
        best_take_profits: best.take_profits,
        best_mean_terminal: best.mean_terminal,
        best_target_hit_rate: best.target_hit_rate,
        scores: result.scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    fn simulate_payload_from_json(json: &str) -> Result<SimulationConfig, String> {
        let payload = serde_json::from_str::<SimulatePayload>(json)
            .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
        config_from_payload(&payload)
    }

    #[test]
    fn build_config_converts_annual_percent_to_daily_units() {
        let config = build_config(&sample_cli()).expect("valid inputs");

        assert_eq!(config.horizon_days, 1_825);
        assert_eq!(config.num_paths, 200);
        let (daily_mu, daily_sigma) = config.return_model.daily_params();
        assert_approx(daily_mu, 0.15 / 365.0);
        assert_approx(daily_sigma, 0.20 / (365.0_f64).sqrt());
        assert_approx(config.drawdown_trigger, 0.05);
        assert_approx(config.reinvest_fraction, 0.5);
        assert_eq!(config.milestones.len(), 6);
    }

    #[test]
    fn build_config_rejects_zero_simulations() {
        let mut cli = sample_cli();
        cli.simulations = 0;
        let err = build_config(&cli).expect_err("must reject");
        assert!(err.contains("--simulations"));
    }

    #[test]
    fn build_config_rejects_negative_volatility() {
        let mut cli = sample_cli();
        cli.annual_volatility = -1.0;
        let err = build_config(&cli).expect_err("must reject");
        assert!(err.contains("--annual-volatility"));
    }

    #[test]
    fn build_config_rejects_low_student_t_df() {
        let mut cli = sample_cli();
        cli.return_model = CliReturnModel::StudentT;
        cli.student_t_df = 2.0;
        let err = build_config(&cli).expect_err("must reject");
        assert!(err.contains("--student-t-df"));
    }

    #[test]
    fn build_config_rejects_mismatched_milestone_lists() {
        let mut cli = sample_cli();
        cli.take_profits = vec![1_000.0];
        let err = build_config(&cli).expect_err("must reject");
        assert!(err.contains("--milestones/--take-profits"));
    }

    #[test]
    fn build_config_rejects_unsorted_milestones() {
        let mut cli = sample_cli();
        cli.milestones = vec![60_000.0, 50_000.0];
        cli.take_profits = vec![1_000.0, 1_000.0];
        let err = build_config(&cli).expect_err("must reject");
        assert!(err.contains("strictly increasing"));
    }

    #[test]
    fn build_config_rejects_zero_drawdown_trigger() {
        let mut cli = sample_cli();
        cli.drawdown_trigger = 0.0;
        let err = build_config(&cli).expect_err("must reject");
        assert!(err.contains("--drawdown-trigger"));
    }

    #[test]
    fn payload_parses_camel_case_keys_and_array_lists() {
        let config = simulate_payload_from_json(
            r#"{
                "initialPortfolio": 10000,
                "targetPortfolio": 30000,
                "years": 2,
                "daysPerYear": 250,
                "simulations": 16,
                "seed": 7,
                "annualReturn": 10,
                "annualVolatility": 18,
                "returnModel": "student-t",
                "studentTDf": 5,
                "milestones": [12000, 14000],
                "takeProfits": [500, 500]
            }"#,
        )
        .expect("json should parse");

        assert_approx(config.initial_value, 10_000.0);
        assert_approx(config.target_value, 30_000.0);
        assert_eq!(config.horizon_days, 500);
        assert_eq!(config.num_paths, 16);
        assert_eq!(config.seed, 7);
        assert_eq!(config.milestones.len(), 2);
        assert!(matches!(
            config.return_model,
            ReturnModel::StudentT { df, .. } if df == 5.0
        ));
    }

    #[test]
    fn payload_parses_comma_separated_lists() {
        let config = simulate_payload_from_json(
            r#"{ "milestones": "50000, 60000", "takeProfits": "1000,2000" }"#,
        )
        .expect("json should parse");

        assert_eq!(config.milestones.thresholds(), vec![50_000.0, 60_000.0]);
        assert_eq!(config.milestones.take_profits(), vec![1_000.0, 2_000.0]);
    }

    #[test]
    fn payload_rejects_non_numeric_list_entries() {
        let err = simulate_payload_from_json(r#"{ "milestones": "50000,abc" }"#)
            .expect_err("must reject");
        assert!(err.contains("non-numeric"));
    }

    #[test]
    fn optimize_payload_parses_grids_and_base_fields() {
        let payload = serde_json::from_str::<OptimizePayload>(
            r#"{
                "simulations": 12,
                "seed": 9,
                "milestoneGrid": [[50000], [60000]],
                "takeProfitGrid": [[1000]]
            }"#,
        )
        .expect("json should parse");

        let config = config_from_payload(&payload.base).expect("valid payload");
        assert_eq!(config.num_paths, 12);
        assert_eq!(config.seed, 9);
        assert_eq!(payload.milestone_grid, Some(vec![vec![50_000.0], vec![60_000.0]]));
        assert_eq!(payload.take_profit_grid, Some(vec![vec![1_000.0]]));
    }

    #[test]
    fn simulate_response_serializes_expected_fields() {
        let mut cli = sample_cli();
        cli.years = 1;
        cli.days_per_year = 30;
        cli.simulations = 4;
        let config = build_config(&cli).expect("valid inputs");
        let comparison = run_policy_comparison(&config, config.num_paths).expect("must run");

        let response = build_simulate_response(&config, &comparison);
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(value["horizonDays"], 30);
        assert_eq!(value["simulations"], 4);
        assert!(value["withPolicy"]["meanPath"].is_array());
        assert!(value["withPolicy"]["meanTerminal"].is_number());
        assert!(value["withoutPolicy"]["targetHitRate"].is_number());
        assert!(value["withPolicy"]["anomalies"].is_array());
    }

    #[test]
    fn optimize_response_serializes_best_pair_and_score_table() {
        let mut cli = sample_cli();
        cli.years = 1;
        cli.days_per_year = 20;
        cli.simulations = 4;
        let config = build_config(&cli).expect("valid inputs");

        let result = optimize(
            &config,
            &[vec![50_000.0], vec![60_000.0]],
            &[vec![1_000.0]],
            config.num_paths,
        )
        .expect("must run");

        let response = build_optimize_response(&config, result);
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(value["scores"].as_array().expect("array").len(), 2);
        assert!(value["bestMilestones"].is_array());
        assert!(value["bestMeanTerminal"].is_number());
        assert_eq!(
            value["scores"][0]["milestoneThresholds"][0],
            serde_json::json!(50_000.0)
        );
    }
}
