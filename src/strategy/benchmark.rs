use crate::config::Benchmark;
use crate::data::{Dataset, Field, Window};
use crate::strategy::Strategy;
use std::sync::Arc;

//equal weight on every asset of the window
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl Strategy for Uniform {
    fn weights(&self, window: &Window<'_>, _current: &[f64]) -> anyhow::Result<Vec<f64>> {
        let n = window.n_assets();
        if n == 0 {
            anyhow::bail!("window has no assets");
        }
        Ok(vec![1.0 / n as f64; n])
    }
}

//fully invested in the single-asset index view of a dataset
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexTracking;

impl Strategy for IndexTracking {
    fn weights(&self, window: &Window<'_>, _current: &[f64]) -> anyhow::Result<Vec<f64>> {
        if window.n_assets() != 1 {
            anyhow::bail!(
                "index tracking expects the index view of a dataset, got {} assets",
                window.n_assets()
            );
        }
        Ok(vec![1.0])
    }
}

impl Benchmark {
    pub fn strategy(&self) -> Arc<dyn Strategy> {
        match self {
            Benchmark::Uniform => Arc::new(Uniform),
            Benchmark::Index => Arc::new(IndexTracking),
        }
    }

    //the dataset the benchmark runs on, none when it does not apply
    pub fn dataset_for(&self, dataset: &Arc<Dataset>, price_field: &Field) -> Option<Arc<Dataset>> {
        match self {
            Benchmark::Uniform => Some(Arc::clone(dataset)),
            Benchmark::Index => dataset.index_dataset(price_field).map(Arc::new),
        }
    }
}
