use crate::engine::RunResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//a point in the wealth curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WealthPoint {
    pub timestamp: DateTime<Utc>,
    pub wealth: f64,
    pub drawdown: f64,
    pub returns: f64,
}

//wealth curve of a run with running drawdowns
pub fn wealth_curve(run: &RunResult) -> Vec<WealthPoint> {
    let drawdowns = drawdowns(&run.wealth);
    run.timestamps
        .iter()
        .zip(&run.wealth)
        .zip(&run.returns)
        .zip(drawdowns)
        .map(|(((&timestamp, &wealth), &returns), drawdown)| WealthPoint {
            timestamp,
            wealth,
            drawdown,
            returns,
        })
        .collect()
}

//relative decline from the running peak, the peak starts at the initial wealth of 1
pub fn drawdowns(wealth: &[f64]) -> Vec<f64> {
    let mut peak = 1.0_f64;
    wealth
        .iter()
        .map(|&w| {
            if w > peak {
                peak = w;
            }
            if peak > 0.0 {
                (peak - w) / peak
            } else {
                0.0
            }
        })
        .collect()
}

//calculates maximum drawdown of a wealth series
pub fn max_drawdown(wealth: &[f64]) -> f64 {
    drawdowns(wealth).into_iter().fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_drawdowns() {
        let dd = drawdowns(&[1.1, 0.99, 1.2, 0.9]);
        assert_relative_eq!(dd[0], 0.0);
        assert_relative_eq!(dd[1], 0.1);
        assert_relative_eq!(dd[2], 0.0);
        assert_relative_eq!(dd[3], 0.25);
        assert_relative_eq!(max_drawdown(&[1.1, 0.99, 1.2, 0.9]), 0.25);
    }

    #[test]
    fn test_initial_wealth_counts_as_peak() {
        assert_relative_eq!(max_drawdown(&[0.8, 0.9]), 0.2);
        assert_eq!(max_drawdown(&[]), 0.0);
    }
}
