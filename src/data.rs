//! Transaction ingestion and row validation
//!
//! Reads the raw retail transaction table from a CSV byte stream and applies
//! the row-level validity rules: null customer ids, negative quantities, and
//! negative prices are dropped before anything downstream sees the data.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

/// A validated transaction row
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Invoice identifier (shared across the line items of one invoice)
    pub invoice: String,
    pub customer_id: i64,
    pub quantity: i64,
    pub price: f64,
    pub invoice_date: NaiveDateTime,
}

impl Transaction {
    /// Derived monetary value of the row
    pub fn total_amount(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// Raw CSV row. Both published header variants of the retail dataset are
/// accepted; unknown columns (StockCode, Description, Country) are ignored.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "Invoice", alias = "InvoiceNo")]
    invoice: String,
    #[serde(rename = "Quantity")]
    quantity: i64,
    #[serde(rename = "InvoiceDate")]
    invoice_date: String,
    #[serde(rename = "Price", alias = "UnitPrice")]
    price: f64,
    #[serde(rename = "Customer ID", alias = "CustomerID")]
    customer_id: Option<f64>,
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

fn parse_invoice_date(raw: &str) -> crate::Result<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    anyhow::bail!("unparseable invoice date: {raw:?}")
}

/// Read and validate transactions from any CSV byte stream
///
/// Malformed rows and missing required columns propagate as a data-format
/// failure; nothing partial is returned. Rows failing the validity rules are
/// silently dropped.
pub fn read_transactions<R: Read>(reader: R) -> crate::Result<Vec<Transaction>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut transactions = Vec::new();
    let mut dropped = 0usize;

    for (idx, row) in csv_reader.deserialize::<RawRecord>().enumerate() {
        let row = row.with_context(|| format!("malformed transaction row {}", idx + 1))?;

        let customer_id = match row.customer_id {
            Some(id) => id as i64,
            None => {
                dropped += 1;
                continue;
            }
        };
        if row.quantity < 0 || row.price < 0.0 {
            dropped += 1;
            continue;
        }

        transactions.push(Transaction {
            invoice: row.invoice,
            customer_id,
            quantity: row.quantity,
            price: row.price,
            invoice_date: parse_invoice_date(&row.invoice_date)?,
        });
    }

    if transactions.is_empty() {
        anyhow::bail!("no valid transactions found after filtering");
    }

    debug!(kept = transactions.len(), dropped, "transaction ingestion complete");
    Ok(transactions)
}

/// Read and validate transactions from a CSV file on disk
pub fn load_transactions(path: impl AsRef<Path>) -> crate::Result<Vec<Transaction>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("cannot open transaction file {}", path.display()))?;
    read_transactions(file).with_context(|| format!("while reading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(csv: &str) -> crate::Result<Vec<Transaction>> {
        read_transactions(csv.as_bytes())
    }

    #[test]
    fn test_reads_valid_rows() {
        let csv = "\
Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country
536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,2010-12-01T08:26:00,2.55,17850.0,United Kingdom
536366,22633,HAND WARMER UNION JACK,2,2010-12-01 08:28:00,1.85,13047.0,United Kingdom
";
        let rows = read(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].customer_id, 17850);
        assert_eq!(rows[0].total_amount(), 6.0 * 2.55);
        assert_eq!(rows[1].invoice, "536366");
    }

    #[test]
    fn test_accepts_legacy_header_variant() {
        let csv = "\
InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country
536365,85123A,WHITE METAL LANTERN,6,12/1/2010 8:26,3.39,17850,United Kingdom
";
        let rows = read(csv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 3.39);
        assert_eq!(rows[0].invoice_date.format("%Y-%m-%d").to_string(), "2010-12-01");
    }

    #[test]
    fn test_drops_invalid_rows() {
        let csv = "\
Invoice,Quantity,InvoiceDate,Price,Customer ID
1,6,2010-12-01T08:26:00,2.55,17850
2,-1,2010-12-01T08:26:00,2.55,17850
3,6,2010-12-01T08:26:00,-0.5,17850
4,6,2010-12-01T08:26:00,2.55,
";
        let rows = read(csv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice, "1");
    }

    #[test]
    fn test_missing_required_column_fails() {
        let csv = "\
Invoice,InvoiceDate,Price,Customer ID
1,2010-12-01T08:26:00,2.55,17850
";
        assert!(read(csv).is_err());
    }

    #[test]
    fn test_unparseable_date_fails() {
        let csv = "\
Invoice,Quantity,InvoiceDate,Price,Customer ID
1,6,not-a-date,2.55,17850
";
        assert!(read(csv).is_err());
    }

    #[test]
    fn test_all_rows_invalid_fails() {
        let csv = "\
Invoice,Quantity,InvoiceDate,Price,Customer ID
1,6,2010-12-01T08:26:00,2.55,
";
        assert!(read(csv).is_err());
    }
}
