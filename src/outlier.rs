//! Outlier customer detection and wholesale removal
//!
//! A handful of extreme bulk/wholesale customers distort monthly aggregates
//! disproportionately for sequence models, so any customer with at least one
//! transaction beyond the 99.95th percentile of price or quantity is removed
//! entirely, not just the offending rows. The removal happens before any
//! aggregation.

use std::collections::BTreeSet;

use tracing::info;

use crate::data::Transaction;
use crate::stats::quantile;

/// Percentile above which a price or quantity marks its customer as an outlier
pub const OUTLIER_QUANTILE: f64 = 0.9995;

/// Remove every transaction of every outlier customer
///
/// Thresholds are computed independently for price and quantity over all rows;
/// the two customer sets are unioned. A row must strictly exceed a threshold
/// to count. Returns the surviving transactions and the excluded customer ids.
pub fn filter_outlier_customers(
    transactions: Vec<Transaction>,
) -> (Vec<Transaction>, BTreeSet<i64>) {
    let prices: Vec<f64> = transactions.iter().map(|t| t.price).collect();
    let quantities: Vec<f64> = transactions.iter().map(|t| t.quantity as f64).collect();
    let price_cut = quantile(&prices, OUTLIER_QUANTILE);
    let quantity_cut = quantile(&quantities, OUTLIER_QUANTILE);

    let mut outliers = BTreeSet::new();
    for t in &transactions {
        if t.price > price_cut || t.quantity as f64 > quantity_cut {
            outliers.insert(t.customer_id);
        }
    }

    let kept: Vec<Transaction> = transactions
        .into_iter()
        .filter(|t| !outliers.contains(&t.customer_id))
        .collect();

    info!(
        outlier_customers = outliers.len(),
        kept_rows = kept.len(),
        price_cut,
        quantity_cut,
        "outlier filter applied"
    );
    (kept, outliers)
}
