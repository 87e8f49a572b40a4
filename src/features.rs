//! Monthly aggregation, feature window derivation, and tensor assembly
//!
//! This is the heart of the pipeline: irregular per-customer transaction
//! history is grouped into calendar-month aggregates, reindexed onto a fixed
//! 22-month window shared by every customer, and packed into a
//! (customers × months × features) tensor. Customer ids travel alongside the
//! tensor rows so predictions can never drift out of correspondence.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use anyhow::bail;
use chrono::{Datelike, NaiveDateTime};
use ndarray::Array3;
use tracing::debug;

use crate::data::Transaction;

/// Fixed length of the feature window, in calendar months
pub const WINDOW_MONTHS: usize = 22;

/// Features per month: spend, distinct invoices, quantity
pub const N_FEATURES: usize = 3;

/// A calendar year-month with total ordering and month arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    // months since year 0; keeps ordering and offsets exact
    index: i32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Self {
            index: year * 12 + month as i32 - 1,
        }
    }

    pub fn from_datetime(ts: &NaiveDateTime) -> Self {
        Self::new(ts.year(), ts.month())
    }

    pub fn year(&self) -> i32 {
        self.index.div_euclid(12)
    }

    pub fn month(&self) -> u32 {
        (self.index.rem_euclid(12) + 1) as u32
    }

    /// The month exactly `months` calendar months earlier
    pub fn minus_months(self, months: i32) -> Self {
        Self {
            index: self.index - months,
        }
    }

    fn range_inclusive(start: Self, end: Self) -> impl Iterator<Item = Self> {
        (start.index..=end.index).map(|index| Self { index })
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

/// Per-customer, per-month activity summary
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonthlyAggregate {
    /// Summed total amount for the month
    pub monthly_spend: f64,
    /// Count of distinct invoice identifiers
    pub invoice_count: f64,
    /// Summed item quantity
    pub total_quantity: f64,
}

impl MonthlyAggregate {
    pub fn as_features(&self) -> [f64; N_FEATURES] {
        [self.monthly_spend, self.invoice_count, self.total_quantity]
    }
}

/// Group transactions by (customer, year-month of the invoice timestamp)
///
/// One entry per customer-month that had any activity; deterministic ascending
/// (customer, month) order.
pub fn aggregate_monthly(
    transactions: &[Transaction],
) -> BTreeMap<(i64, YearMonth), MonthlyAggregate> {
    let mut groups: BTreeMap<(i64, YearMonth), MonthlyAggregate> = BTreeMap::new();
    let mut invoices: BTreeMap<(i64, YearMonth), HashSet<&str>> = BTreeMap::new();

    for t in transactions {
        let key = (t.customer_id, YearMonth::from_datetime(&t.invoice_date));
        let entry = groups.entry(key).or_default();
        entry.monthly_spend += t.total_amount();
        entry.total_quantity += t.quantity as f64;
        if invoices.entry(key).or_default().insert(t.invoice.as_str()) {
            entry.invoice_count += 1.0;
        }
    }

    groups
}

/// The fixed 22-month span every customer sequence is aligned to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureWindow {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl FeatureWindow {
    /// Derive the window from the latest observed invoice timestamp
    ///
    /// The window ends one month before the month of `present_value`, so the
    /// current (possibly partial) month never contributes a truncated final
    /// observation, and starts exactly 22 months before `present_value`.
    pub fn from_present_value(present_value: NaiveDateTime) -> Self {
        let present = YearMonth::from_datetime(&present_value);
        Self {
            start: present.minus_months(WINDOW_MONTHS as i32),
            end: present.minus_months(1),
        }
    }

    /// Window months in chronological ascending order
    pub fn months(&self) -> Vec<YearMonth> {
        YearMonth::range_inclusive(self.start, self.end).collect()
    }

    pub fn len(&self) -> usize {
        (self.end.index - self.start.index + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end.index < self.start.index
    }

    pub fn contains(&self, month: YearMonth) -> bool {
        self.start <= month && month <= self.end
    }
}

impl fmt::Display for FeatureWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Customer ids paired with their feature sequences
///
/// `tensor` has shape (customers × window months × features); row `i` always
/// belongs to `customer_ids[i]`.
#[derive(Debug, Clone)]
pub struct SequenceData {
    pub customer_ids: Vec<i64>,
    pub tensor: Array3<f64>,
    pub window: FeatureWindow,
}

/// Build the aligned, unscaled sequence tensor from filtered transactions
///
/// Every customer with at least one surviving aggregate row participates.
/// Months inside the window with no activity are explicit zeros; aggregate
/// rows outside the window are discarded. By construction each customer gets
/// exactly one row per window month.
pub fn build_sequences(transactions: &[Transaction]) -> crate::Result<SequenceData> {
    let present_value = match transactions.iter().map(|t| t.invoice_date).max() {
        Some(ts) => ts,
        None => bail!("cannot build feature sequences from an empty transaction set"),
    };

    let window = FeatureWindow::from_present_value(present_value);
    let months = window.months();
    let aggregates = aggregate_monthly(transactions);

    // BTreeMap keys are sorted by (customer, month), so consecutive keys of
    // one customer are adjacent and first-appearance order is ascending id.
    let mut customer_ids: Vec<i64> = Vec::new();
    for &(customer, _) in aggregates.keys() {
        if customer_ids.last() != Some(&customer) {
            customer_ids.push(customer);
        }
    }

    let mut tensor = Array3::<f64>::zeros((customer_ids.len(), months.len(), N_FEATURES));
    for (i, &customer) in customer_ids.iter().enumerate() {
        for (t, &month) in months.iter().enumerate() {
            if let Some(aggregate) = aggregates.get(&(customer, month)) {
                for (f, value) in aggregate.as_features().into_iter().enumerate() {
                    tensor[[i, t, f]] = value;
                }
            }
        }
    }

    debug!(
        customers = customer_ids.len(),
        window = %window,
        "assembled sequence tensor"
    );
    Ok(SequenceData {
        customer_ids,
        tensor,
        window,
    })
}
