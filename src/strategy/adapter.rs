use crate::config::WeightConstraints;
use crate::data::Window;
use crate::engine::fault::{guard, Fault};
use crate::strategy::Strategy;

//uniform calling contract around a strategy: every call goes through the fault
//boundary and every answer is checked before the simulator sees it
pub struct StrategyAdapter<'a> {
    name: &'a str,
    strategy: &'a dyn Strategy,
    constraints: WeightConstraints,
}

impl<'a> StrategyAdapter<'a> {
    pub fn new(name: &'a str, strategy: &'a dyn Strategy, constraints: WeightConstraints) -> Self {
        StrategyAdapter {
            name,
            strategy,
            constraints,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    //calls the strategy with the window and the current weights
    pub fn invoke(&self, window: &Window<'_>, current: &[f64]) -> Result<Vec<f64>, Fault> {
        let site = || {
            format!(
                "strategy '{}' on dataset '{}' at bar {}",
                self.name,
                window.dataset_name(),
                window.bars().end
            )
        };

        let weights = guard(|| self.strategy.weights(window, current)).map_err(|fault| {
            if fault.location.is_none() {
                fault.with_location(site())
            } else {
                fault
            }
        })?;

        self.validate(window, &weights)
            .map_err(|message| Fault::new(message).with_location(site()))?;
        Ok(weights)
    }

    fn validate(&self, window: &Window<'_>, weights: &[f64]) -> Result<(), String> {
        if weights.len() != window.n_assets() {
            return Err(format!(
                "strategy returned {} weights for {} assets",
                weights.len(),
                window.n_assets()
            ));
        }
        if let Some((i, w)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite()) {
            return Err(format!(
                "strategy returned non-finite weight {} for asset '{}'",
                w,
                window.assets()[i]
            ));
        }
        self.constraints.check(weights)
    }
}
