pub mod dataset;
pub mod loader;

pub use dataset::{simple_return, Dataset, DatasetBuilder, Field, FieldMatrix, MatrixView, Window};
pub use loader::{load_csv, load_dir};
