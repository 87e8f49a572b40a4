//! ValueForge: customer monetary-value prediction from retail transaction logs
//!
//! This library turns raw, irregular transaction records into fixed-shape
//! monthly feature sequences and runs them through a pretrained GRU model,
//! producing one value prediction per customer together with the ranking,
//! metric, and segmentation views consumed by a serving layer.

pub mod cli;
pub mod data;
pub mod features;
pub mod model;
pub mod outlier;
pub mod pipeline;
pub mod scaler;
pub mod stats;
pub mod store;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_transactions, read_transactions, Transaction};
pub use features::{FeatureWindow, SequenceData, YearMonth};
pub use model::GruModel;
pub use pipeline::{predict, preprocess};
pub use scaler::RobustScaler;
pub use store::{PredictionBatch, PredictionRecord, PredictionStore};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
