//! End-to-end orchestration: transactions in, prediction records out
//!
//! Stateless and synchronous per call; concurrent callers only ever share
//! state through the snapshot store.

use anyhow::bail;
use tracing::info;

use crate::data::Transaction;
use crate::features::{build_sequences, SequenceData};
use crate::model::GruModel;
use crate::outlier::filter_outlier_customers;
use crate::scaler::{log1p_inplace, RobustScaler};
use crate::store::PredictionRecord;

/// Run the full preprocessing pipeline
///
/// Outlier filter -> monthly aggregation -> window reindex -> tensor assembly
/// -> log1p -> robust scaling. The returned tensor is ready for the model.
pub fn preprocess(
    transactions: Vec<Transaction>,
    scaler: &RobustScaler,
) -> crate::Result<SequenceData> {
    let (filtered, excluded) = filter_outlier_customers(transactions);
    if filtered.is_empty() {
        bail!("no transactions left after outlier filtering");
    }

    let mut sequences = build_sequences(&filtered)?;
    log1p_inplace(&mut sequences.tensor);
    scaler.transform(&mut sequences.tensor);

    info!(
        customers = sequences.customer_ids.len(),
        excluded_customers = excluded.len(),
        window = %sequences.window,
        "preprocessing complete"
    );
    Ok(sequences)
}

/// Preprocess and predict, keeping customer ids paired with their values
pub fn predict(
    transactions: Vec<Transaction>,
    scaler: &RobustScaler,
    model: &GruModel,
) -> crate::Result<Vec<PredictionRecord>> {
    let sequences = preprocess(transactions, scaler)?;
    let values = model.predict(&sequences.tensor)?;

    Ok(sequences
        .customer_ids
        .iter()
        .zip(values)
        .map(|(&customer_id, prediction)| PredictionRecord {
            customer_id,
            prediction,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{N_FEATURES, WINDOW_MONTHS};
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn tx(customer_id: i64, invoice: &str, quantity: i64, price: f64, date: NaiveDateTime) -> Transaction {
        Transaction {
            invoice: invoice.to_string(),
            customer_id,
            quantity,
            price,
            invoice_date: date,
        }
    }

    #[test]
    fn test_preprocess_shapes_and_scaling() {
        // duplicated maxima keep the outlier filter inert
        let transactions = vec![
            tx(1, "A1", 12, 7.65, ts(2010, 12, 1)),
            tx(2, "B1", 12, 7.65, ts(2011, 6, 10)),
            tx(2, "B2", 1, 1.0, ts(2011, 12, 5)),
        ];
        let scaler = RobustScaler::identity();
        let data = preprocess(transactions, &scaler).unwrap();

        assert_eq!(data.customer_ids, vec![1, 2]);
        assert_eq!(data.tensor.dim(), (2, WINDOW_MONTHS, N_FEATURES));

        // customer 1, 2010-12 sits at offset 10 of the 2010-02..2011-11 window
        let spend = data.tensor[[0, 10, 0]];
        assert!((spend - (12.0 * 7.65_f64).ln_1p()).abs() < 1e-9);
        // inactive months stay exactly zero under the identity scaler
        assert_eq!(data.tensor[[0, 0, 0]], 0.0);
    }

    #[test]
    fn test_outlier_customer_absent_from_predictions() {
        let mut transactions: Vec<Transaction> = (0..60)
            .map(|i| tx(1 + (i % 3), &format!("I{i}"), 5, 2.0, ts(2011, 1 + (i % 11) as u32, 3)))
            .collect();
        // customer 9 has one extreme row and one unremarkable row
        transactions.push(tx(9, "X1", 5, 2.0, ts(2011, 5, 2)));
        transactions.push(tx(9, "X2", 90_000, 2.0, ts(2011, 6, 2)));

        let scaler = RobustScaler::identity();
        let data = preprocess(transactions, &scaler).unwrap();
        assert_eq!(data.customer_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_predict_pairs_ids_with_values() {
        let weights = serde_json::json!({
            "input_size": 3,
            "hidden_size": 16,
            "layers": [
                {
                    "weight_ih": vec![vec![0.0; 3]; 48],
                    "weight_hh": vec![vec![0.0; 16]; 48],
                    "bias_ih": vec![0.0; 48],
                    "bias_hh": vec![0.0; 48],
                },
                {
                    "weight_ih": vec![vec![0.0; 16]; 48],
                    "weight_hh": vec![vec![0.0; 16]; 48],
                    "bias_ih": vec![0.0; 48],
                    "bias_hh": vec![0.0; 48],
                }
            ],
            "layer_norm": { "gamma": vec![1.0; 16], "beta": vec![0.0; 16], "eps": 1e-5 },
            "fc1": { "weight": vec![vec![0.0; 16]; 8], "bias": vec![0.0; 8] },
            "fc2": { "weight": vec![vec![0.0; 8]; 4], "bias": vec![0.0; 4] },
            "output": { "weight": vec![vec![0.0; 4]; 1], "bias": vec![1.25] },
        });
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), weights.to_string()).unwrap();
        let model = GruModel::load(file.path()).unwrap();

        let transactions = vec![
            tx(1, "A1", 12, 7.65, ts(2010, 12, 1)),
            tx(2, "B1", 12, 7.65, ts(2011, 6, 10)),
        ];
        let records = predict(transactions, &RobustScaler::identity(), &model).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].customer_id, 1);
        assert_eq!(records[1].customer_id, 2);
        for r in &records {
            assert!((r.prediction - 1.25).abs() < 1e-9);
        }
    }
}
