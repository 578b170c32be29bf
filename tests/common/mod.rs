#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use portfolio_bench::data::{Dataset, Field, FieldMatrix};

//deterministic pseudo-random stream so fixtures never change between runs
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
    }

    //uniform in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    //roughly normal via the sum of twelve uniforms
    pub fn next_normal(&mut self) -> f64 {
        (0..12).map(|_| self.next_f64()).sum::<f64>() - 6.0
    }
}

//daily geometric random walk with adjusted and close prices plus an index series
pub fn random_walk(name: &str, seed: u64, bars: usize, assets: usize) -> Dataset {
    let mut rng = Lcg::new(seed);
    let start = Utc.with_ymd_and_hms(2019, 1, 2, 0, 0, 0).unwrap();
    let timestamps = (0..bars).map(|i| start + Duration::days(i as i64)).collect();
    let symbols = (0..assets).map(|j| format!("A{:02}", j)).collect();

    let drifts: Vec<f64> = (0..assets).map(|_| (rng.next_f64() - 0.4) * 0.001).collect();
    let vols: Vec<f64> = (0..assets).map(|_| 0.005 + rng.next_f64() * 0.02).collect();
    let mut prices = vec![100.0; assets];
    let mut rows = Vec::with_capacity(bars);
    let mut index = Vec::with_capacity(bars);
    for _ in 0..bars {
        for j in 0..assets {
            prices[j] *= 1.0 + drifts[j] + vols[j] * rng.next_normal();
        }
        index.push(prices.iter().sum::<f64>() / assets as f64);
        rows.push(prices.clone());
    }

    let matrix = FieldMatrix::from_rows(rows).unwrap();
    Dataset::builder(name, timestamps, symbols)
        .field(Field::Adjusted, matrix.clone())
        .field(Field::Close, matrix)
        .index(index)
        .build()
        .unwrap()
}

//every asset grows by the same constant rate each bar
pub fn constant_growth(name: &str, bars: usize, assets: usize, rate: f64) -> Dataset {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let timestamps = (0..bars).map(|i| start + Duration::days(i as i64)).collect();
    let symbols = (0..assets).map(|j| format!("C{}", j)).collect();
    let rows = (0..bars)
        .map(|i| vec![50.0 * (1.0 + rate).powi(i as i32); assets])
        .collect();
    Dataset::builder(name, timestamps, symbols)
        .field(Field::Adjusted, FieldMatrix::from_rows(rows).unwrap())
        .build()
        .unwrap()
}

//ten datasets of two years of daily bars over fifty assets
pub fn universe() -> Vec<Dataset> {
    (0..10)
        .map(|i| random_walk(&format!("universe {}", i + 1), 1000 + i as u64, 504, 50))
        .collect()
}
