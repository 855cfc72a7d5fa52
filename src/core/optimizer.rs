use rayon::prelude::*;

use super::engine::run_ensemble;
use super::types::{
    CandidateScore, MilestoneTable, OptimizationResult, SimError, SimulationConfig,
};

pub fn optimize(
    base_config: &SimulationConfig,
    milestone_candidates: &[Vec<f64>],
    take_profit_candidates: &[Vec<f64>],
    num_paths: u32,
) -> Result<OptimizationResult, SimError> {
    base_config.validate()?;
    if num_paths == 0 {
        return Err(SimError::InvalidParameter(
            "path count must be > 0".to_string(),
        ));
    }
    if milestone_candidates.is_empty() || take_profit_candidates.is_empty() {
        return Err(SimError::InvalidParameter(
            "candidate grids must be non-empty".to_string(),
        ));
    }

    // Every cross-product pair must form a valid table before any simulation
    // starts, so a malformed grid cannot leave a partial run behind.
    let mut candidates =
        Vec::with_capacity(milestone_candidates.len() * take_profit_candidates.len());
    for thresholds in milestone_candidates {
        for take_profits in take_profit_candidates {
            let table = MilestoneTable::from_pairs(thresholds, take_profits)?;
            candidates.push(table);
        }
    }

    let scores: Vec<CandidateScore> = candidates
        .into_par_iter()
        .map(|table| {
            let mut config = base_config.clone();
            config.milestones = table;
            let ensemble = run_ensemble(&config, num_paths)?;
            Ok(CandidateScore {
                milestone_thresholds: config.milestones.thresholds(),
                take_profits: config.milestones.take_profits(),
                mean_terminal: ensemble.mean_terminal,
                target_hit_rate: ensemble.target_hit_rate,
                anomalous_paths: ensemble.anomalous_paths,
            })
        })
        .collect::<Result<Vec<_>, SimError>>()?;

    // Strict comparison: the first candidate seen in cross-product order keeps
    // the lead on ties.
    let mut best_index = 0;
    for (index, score) in scores.iter().enumerate().skip(1) {
        if score.mean_terminal > scores[best_index].mean_terminal {
            best_index = index;
        }
    }

    Ok(OptimizationResult { best_index, scores })
}
