use crate::config::TransactionCost;

//outcome of moving the book to new target weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rebalance {
    //l1 distance between the old and new weights
    pub turnover: f64,
    //fraction of wealth paid in transaction costs
    pub cost: f64,
}

//weights and wealth carried across rebalance steps of one run
//weights are fractions of current wealth, the remainder sits in cash at zero return
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingState {
    weights: Vec<f64>,
    wealth: f64,
}

impl HoldingState {
    //flat book with unit wealth
    pub fn new(n_assets: usize) -> Self {
        HoldingState {
            weights: vec![0.0; n_assets],
            wealth: 1.0,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn wealth(&self) -> f64 {
        self.wealth
    }

    pub fn turnover_to(&self, target: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(target)
            .map(|(old, new)| (new - old).abs())
            .sum()
    }

    //replaces the weights and charges the cost of the trade against wealth
    pub fn rebalance(&mut self, target: Vec<f64>, cost: &TransactionCost) -> Rebalance {
        let turnover = self.turnover_to(&target);
        let cost = cost.fraction(&self.weights, &target).min(1.0);
        self.wealth *= 1.0 - cost;
        self.weights = target;
        Rebalance { turnover, cost }
    }

    //applies one bar of asset returns, lets the weights drift and returns the portfolio return
    pub fn advance(&mut self, asset_returns: &[f64]) -> f64 {
        let portfolio_return: f64 = self
            .weights
            .iter()
            .zip(asset_returns)
            .map(|(w, r)| w * r)
            .sum();
        let growth = 1.0 + portfolio_return;

        if growth <= 0.0 {
            //wiped out, nothing left to drift
            self.wealth = 0.0;
            self.weights.iter_mut().for_each(|w| *w = 0.0);
            return -1.0;
        }

        self.wealth *= growth;
        for (w, r) in self.weights.iter_mut().zip(asset_returns) {
            *w = *w * (1.0 + r) / growth;
        }
        portfolio_return
    }
}
