use serde::{Deserialize, Serialize};

use crate::metrics::{Direction, MetricReport};

/// A successful candidate with whatever metric could be recovered for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
    pub index: usize,
    pub metric: Option<MetricReport>,
}

/// Winner of the selection phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub index: usize,
    pub metric: Option<MetricReport>,
    pub direction: Direction,
    /// False when no success had a usable metric and the first success was taken.
    pub scored: bool,
}

/// Pick the best scored success by `direction`; ties keep the earlier
/// candidate. Without any scored success, the first success in list order wins.
pub fn select_winner(successes: &[ScoredCandidate], direction: Direction) -> Option<Selection> {
    let mut best: Option<(&ScoredCandidate, f64)> = None;
    for c in successes {
        let Some(value) = c.metric.as_ref().map(|m| m.value).filter(|v| v.is_finite()) else {
            continue;
        };
        match best.map(|(_, v)| v) {
            Some(incumbent) if !direction.improves(value, incumbent) => {}
            _ => best = Some((c, value)),
        }
    }

    if let Some((c, _)) = best {
        return Some(Selection { index: c.index, metric: c.metric.clone(), direction, scored: true });
    }
    successes.first().map(|c| Selection { index: c.index, metric: None, direction, scored: false })
}
