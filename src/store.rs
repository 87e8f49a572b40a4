//! Versioned prediction snapshots and the read views served to clients
//!
//! Replaces ad-hoc mutable result caches with a single atomically swapped,
//! immutable batch: writers publish a whole new snapshot, readers always see
//! a consistent one. Queries made before the first successful pipeline run
//! report an explicit "no predictions available" condition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::bail;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::stats;

/// One customer's predicted value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub customer_id: i64,
    pub prediction: f64,
}

/// An immutable, versioned prediction run
#[derive(Debug, Clone, Serialize)]
pub struct PredictionBatch {
    pub run_id: u64,
    pub created_at: DateTime<Utc>,
    /// Records in pipeline order (ascending customer id)
    pub records: Vec<PredictionRecord>,
}

/// Summary statistics over a batch's prediction values
#[derive(Debug, Clone, Serialize)]
pub struct PredictionMetrics {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub max: f64,
}

/// Three-tier value segmentation with its percentile thresholds
#[derive(Debug, Clone, Serialize)]
pub struct Segmentation {
    /// prediction >= p90
    pub high: Vec<PredictionRecord>,
    /// p75 <= prediction < p90
    pub medium: Vec<PredictionRecord>,
    /// prediction < p75
    pub low: Vec<PredictionRecord>,
    pub p75: f64,
    pub p90: f64,
}

impl PredictionBatch {
    /// Top `n` customers by prediction, descending; ties keep pipeline order
    pub fn top_n(&self, n: usize) -> Vec<PredictionRecord> {
        let mut ranked = self.records.clone();
        // std's sort is stable, so equal predictions preserve input order
        ranked.sort_by(|a, b| b.prediction.total_cmp(&a.prediction));
        ranked.truncate(n);
        ranked
    }

    pub fn metrics(&self) -> PredictionMetrics {
        let values: Vec<f64> = self.records.iter().map(|r| r.prediction).collect();
        PredictionMetrics {
            count: values.len(),
            mean: stats::mean(&values),
            std: stats::population_std(&values),
            p50: stats::quantile(&values, 0.50),
            p75: stats::quantile(&values, 0.75),
            p90: stats::quantile(&values, 0.90),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// Deterministic partition: every record lands in exactly one tier
    pub fn segment(&self) -> Segmentation {
        let values: Vec<f64> = self.records.iter().map(|r| r.prediction).collect();
        let p75 = stats::quantile(&values, 0.75);
        let p90 = stats::quantile(&values, 0.90);

        let mut high = Vec::new();
        let mut medium = Vec::new();
        let mut low = Vec::new();
        for &record in &self.records {
            if record.prediction >= p90 {
                high.push(record);
            } else if record.prediction >= p75 {
                medium.push(record);
            } else {
                low.push(record);
            }
        }
        Segmentation {
            high,
            medium,
            low,
            p75,
            p90,
        }
    }

    /// Render the whole batch as a CSV document
    pub fn to_csv(&self) -> crate::Result<String> {
        records_to_csv(&self.records)
    }
}

/// CSV rendering shared by the batch and tier exports
pub fn records_to_csv(records: &[PredictionRecord]) -> crate::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["CustomerID", "Prediction"])?;
    for r in records {
        writer.write_record([r.customer_id.to_string(), r.prediction.to_string()])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing csv export: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}

/// Process-wide holder of the latest prediction batch
#[derive(Debug)]
pub struct PredictionStore {
    current: ArcSwapOption<PredictionBatch>,
    next_run_id: AtomicU64,
}

impl PredictionStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Publish a new batch, atomically replacing the previous snapshot
    pub fn publish(&self, records: Vec<PredictionRecord>) -> Arc<PredictionBatch> {
        let batch = Arc::new(PredictionBatch {
            run_id: self.next_run_id.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
            records,
        });
        self.current.store(Some(batch.clone()));
        info!(
            run_id = batch.run_id,
            customers = batch.records.len(),
            "published prediction batch"
        );
        batch
    }

    /// The current immutable snapshot
    pub fn snapshot(&self) -> crate::Result<Arc<PredictionBatch>> {
        match self.current.load_full() {
            Some(batch) => Ok(batch),
            None => bail!("no predictions available; run the pipeline first"),
        }
    }
}

impl Default for PredictionStore {
    fn default() -> Self {
        Self::new()
    }
}
