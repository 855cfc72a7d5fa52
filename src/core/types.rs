use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    InvalidParameter(String),
    ConfigurationMismatch(String),
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::ConfigurationMismatch(msg) => write!(f, "configuration mismatch: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnModel {
    Lognormal { daily_mu: f64, daily_sigma: f64 },
    ArithmeticNormal { daily_mu: f64, daily_sigma: f64 },
    StudentT { df: f64, daily_mu: f64, daily_sigma: f64 },
}

impl ReturnModel {
    pub fn daily_params(&self) -> (f64, f64) {
        match *self {
            Self::Lognormal {
                daily_mu,
                daily_sigma,
            }
            | Self::ArithmeticNormal {
                daily_mu,
                daily_sigma,
            }
            | Self::StudentT {
                daily_mu,
                daily_sigma,
                ..
            } => (daily_mu, daily_sigma),
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let (daily_mu, daily_sigma) = self.daily_params();
        if !daily_mu.is_finite() {
            return Err(SimError::InvalidParameter(
                "daily return mean must be finite".to_string(),
            ));
        }
        if !daily_sigma.is_finite() || daily_sigma < 0.0 {
            return Err(SimError::InvalidParameter(
                "daily return volatility must be finite and >= 0".to_string(),
            ));
        }
        if let Self::StudentT { df, .. } = *self {
            if !df.is_finite() || df <= 2.0 {
                return Err(SimError::InvalidParameter(
                    "student-t degrees of freedom must be > 2".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Milestone {
    pub threshold: f64,
    pub take_profit: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilestoneTable {
    milestones: Vec<Milestone>,
}

impl MilestoneTable {
    pub fn new(milestones: Vec<Milestone>) -> Result<Self, SimError> {
        for pair in milestones.windows(2) {
            if pair[1].threshold <= pair[0].threshold {
                return Err(SimError::InvalidParameter(
                    "milestone thresholds must be strictly increasing".to_string(),
                ));
            }
        }
        for milestone in &milestones {
            if !milestone.threshold.is_finite() {
                return Err(SimError::InvalidParameter(
                    "milestone thresholds must be finite".to_string(),
                ));
            }
            if !milestone.take_profit.is_finite() || milestone.take_profit < 0.0 {
                return Err(SimError::InvalidParameter(
                    "take-profit amounts must be finite and >= 0".to_string(),
                ));
            }
        }
        Ok(Self { milestones })
    }

    pub fn from_pairs(thresholds: &[f64], take_profits: &[f64]) -> Result<Self, SimError> {
        if thresholds.len() != take_profits.len() {
            return Err(SimError::ConfigurationMismatch(format!(
                "{} milestone thresholds but {} take-profit amounts",
                thresholds.len(),
                take_profits.len()
            )));
        }
        Self::new(
            thresholds
                .iter()
                .zip(take_profits)
                .map(|(&threshold, &take_profit)| Milestone {
                    threshold,
                    take_profit,
                })
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.milestones.iter().map(|m| m.threshold).collect()
    }

    pub fn take_profits(&self) -> Vec<f64> {
        self.milestones.iter().map(|m| m.take_profit).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub initial_value: f64,
    pub target_value: f64,
    pub horizon_days: u32,
    pub num_paths: u32,
    pub drawdown_trigger: f64,
    pub reinvest_fraction: f64,
    pub milestones: MilestoneTable,
    pub return_model: ReturnModel,
    pub seed: u64,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.initial_value.is_finite() || self.initial_value <= 0.0 {
            return Err(SimError::InvalidParameter(
                "initial portfolio value must be finite and > 0".to_string(),
            ));
        }
        if !self.target_value.is_finite() || self.target_value <= 0.0 {
            return Err(SimError::InvalidParameter(
                "target portfolio value must be finite and > 0".to_string(),
            ));
        }
        if self.horizon_days == 0 {
            return Err(SimError::InvalidParameter(
                "horizon must be at least one day".to_string(),
            ));
        }
        if self.num_paths == 0 {
            return Err(SimError::InvalidParameter(
                "path count must be > 0".to_string(),
            ));
        }
        if !self.drawdown_trigger.is_finite()
            || self.drawdown_trigger <= 0.0
            || self.drawdown_trigger > 1.0
        {
            return Err(SimError::InvalidParameter(
                "drawdown trigger must be a fraction in (0, 1]".to_string(),
            ));
        }
        if !self.reinvest_fraction.is_finite() || !(0.0..=1.0).contains(&self.reinvest_fraction) {
            return Err(SimError::InvalidParameter(
                "reinvest fraction must be a fraction in [0, 1]".to_string(),
            ));
        }
        self.return_model.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericAnomaly {
    pub day: u32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResult {
    pub values: Vec<f64>,
    pub anomaly: Option<NumericAnomaly>,
}

impl PathResult {
    pub fn terminal_value(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleResult {
    pub paths: Vec<PathResult>,
    pub mean_path: Vec<f64>,
    pub terminal_values: Vec<f64>,
    pub mean_terminal: f64,
    pub median_terminal: f64,
    pub p10_terminal: f64,
    pub target_hit_rate: f64,
    pub anomalous_paths: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub with_policy: EnsembleResult,
    pub without_policy: EnsembleResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateScore {
    pub milestone_thresholds: Vec<f64>,
    pub take_profits: Vec<f64>,
    pub mean_terminal: f64,
    pub target_hit_rate: f64,
    pub anomalous_paths: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub best_index: usize,
    pub scores: Vec<CandidateScore>,
}

impl OptimizationResult {
    pub fn best(&self) -> &CandidateScore {
        &self.scores[self.best_index]
    }
}
