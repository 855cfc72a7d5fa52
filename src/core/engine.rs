use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal, StudentT};
use rayon::prelude::*;

use super::types::{
    ComparisonResult, EnsembleResult, MilestoneTable, NumericAnomaly, PathResult, ReturnModel,
    SimError, SimulationConfig,
};

#[derive(Debug)]
struct PortfolioState {
    value: f64,
    peak: f64,
    reserve: f64,
    milestone_index: usize,
}

impl PortfolioState {
    fn new(initial_value: f64) -> Self {
        Self {
            value: initial_value,
            peak: initial_value,
            reserve: 0.0,
            milestone_index: 0,
        }
    }
}

enum ReturnSampler {
    Gaussian {
        daily_mu: f64,
        daily_sigma: f64,
    },
    ScaledStudentT {
        daily_mu: f64,
        daily_sigma: f64,
        unit_variance_scale: f64,
        dist: StudentT<f64>,
    },
}

impl ReturnSampler {
    fn for_model(model: &ReturnModel) -> Result<Self, SimError> {
        match *model {
            ReturnModel::Lognormal {
                daily_mu,
                daily_sigma,
            }
            | ReturnModel::ArithmeticNormal {
                daily_mu,
                daily_sigma,
            } => Ok(Self::Gaussian {
                daily_mu,
                daily_sigma,
            }),
            ReturnModel::StudentT {
                df,
                daily_mu,
                daily_sigma,
            } => {
                let dist = StudentT::new(df).map_err(|e| {
                    SimError::InvalidParameter(format!("student-t degrees of freedom: {e}"))
                })?;
                Ok(Self::ScaledStudentT {
                    daily_mu,
                    daily_sigma,
                    unit_variance_scale: (df / (df - 2.0)).sqrt(),
                    dist,
                })
            }
        }
    }

    fn draw(&self, rng: &mut StdRng) -> f64 {
        match self {
            Self::Gaussian {
                daily_mu,
                daily_sigma,
            } => {
                let z: f64 = StandardNormal.sample(rng);
                daily_mu + daily_sigma * z
            }
            Self::ScaledStudentT {
                daily_mu,
                daily_sigma,
                unit_variance_scale,
                dist,
            } => {
                let t = dist.sample(rng) / unit_variance_scale;
                daily_mu + daily_sigma * t
            }
        }
    }
}

fn compound(model: &ReturnModel, value: f64, daily_return: f64) -> f64 {
    match model {
        ReturnModel::Lognormal { .. } | ReturnModel::StudentT { .. } => {
            value * daily_return.exp()
        }
        ReturnModel::ArithmeticNormal { .. } => value * (1.0 + daily_return),
    }
}

fn advance_day(config: &SimulationConfig, state: &mut PortfolioState, daily_return: f64) {
    state.value = compound(&config.return_model, state.value, daily_return);

    // A single large move can cross several thresholds at once; each milestone
    // still fires exactly once per run.
    let milestones = config.milestones.milestones();
    while state.milestone_index < milestones.len()
        && state.value >= milestones[state.milestone_index].threshold
    {
        let take_profit = milestones[state.milestone_index].take_profit;
        state.value -= take_profit;
        state.reserve += take_profit;
        state.milestone_index += 1;
    }

    if state.value > state.peak {
        state.peak = state.value;
    } else if state.peak - state.value >= config.drawdown_trigger * state.peak
        && state.reserve > 0.0
    {
        let reinvest = config.reinvest_fraction * state.reserve;
        state.value += reinvest;
        state.reserve -= reinvest;
    }
}

fn simulate_path(
    config: &SimulationConfig,
    sampler: &ReturnSampler,
    rng: &mut StdRng,
) -> PathResult {
    let mut state = PortfolioState::new(config.initial_value);
    let mut values = Vec::with_capacity(config.horizon_days as usize + 1);
    values.push(state.value);
    let mut anomaly = None;

    for day in 1..=config.horizon_days {
        let daily_return = sampler.draw(rng);
        advance_day(config, &mut state, daily_return);
        if anomaly.is_none() && !(state.value.is_finite() && state.value >= 0.0) {
            anomaly = Some(NumericAnomaly {
                day,
                value: state.value,
            });
        }
        values.push(state.value);
    }

    PathResult { values, anomaly }
}

fn derive_path_seed(base_seed: u64, path_id: u32) -> u64 {
    let mixed = base_seed ^ ((path_id as u64) << 32) ^ path_id as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

pub fn simulate(config: &SimulationConfig) -> Result<PathResult, SimError> {
    config.validate()?;
    let sampler = ReturnSampler::for_model(&config.return_model)?;
    let mut rng = StdRng::seed_from_u64(derive_path_seed(config.seed, 0));
    Ok(simulate_path(config, &sampler, &mut rng))
}

pub fn run_ensemble(config: &SimulationConfig, num_paths: u32) -> Result<EnsembleResult, SimError> {
    config.validate()?;
    if num_paths == 0 {
        return Err(SimError::InvalidParameter(
            "path count must be > 0".to_string(),
        ));
    }
    let sampler = ReturnSampler::for_model(&config.return_model)?;

    // Paths share nothing: each gets its own generator seeded from the run
    // seed and its index, so the ensemble reproduces regardless of how the
    // pool schedules the work.
    let paths: Vec<PathResult> = (0..num_paths)
        .into_par_iter()
        .map(|path_id| {
            let mut rng = StdRng::seed_from_u64(derive_path_seed(config.seed, path_id));
            simulate_path(config, &sampler, &mut rng)
        })
        .collect();

    Ok(build_ensemble_result(config, paths))
}

pub fn run_policy_comparison(
    config: &SimulationConfig,
    num_paths: u32,
) -> Result<ComparisonResult, SimError> {
    let with_policy = run_ensemble(config, num_paths)?;

    let mut baseline = config.clone();
    baseline.milestones = MilestoneTable::empty();
    let without_policy = run_ensemble(&baseline, num_paths)?;

    Ok(ComparisonResult {
        with_policy,
        without_policy,
    })
}

fn build_ensemble_result(config: &SimulationConfig, paths: Vec<PathResult>) -> EnsembleResult {
    let num_paths = paths.len() as f64;
    let mut mean_path = vec![0.0; config.horizon_days as usize + 1];
    for path in &paths {
        for (sum, value) in mean_path.iter_mut().zip(&path.values) {
            *sum += value;
        }
    }
    for sum in &mut mean_path {
        *sum /= num_paths;
    }

    let terminal_values: Vec<f64> = paths.iter().map(PathResult::terminal_value).collect();
    let mean_terminal = terminal_values.iter().sum::<f64>() / num_paths;
    let hits = terminal_values
        .iter()
        .filter(|&&value| value >= config.target_value)
        .count();
    let anomalous_paths = paths.iter().filter(|path| path.anomaly.is_some()).count() as u32;

    let mut sorted_terminals = terminal_values.clone();
    let median_terminal = percentile(&mut sorted_terminals, 50.0);
    let p10_terminal = percentile(&mut sorted_terminals, 10.0);

    EnsembleResult {
        paths,
        mean_path,
        terminal_values,
        mean_terminal,
        median_terminal,
        p10_terminal,
        target_hit_rate: hits as f64 / num_paths,
        anomalous_paths,
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
