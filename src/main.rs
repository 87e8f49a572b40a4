//! ValueForge: customer value prediction CLI
//!
//! This is the main entrypoint that orchestrates artifact loading, data
//! ingestion, the preprocessing pipeline, prediction, and reporting.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;
use valueforge::{data, pipeline, Args, GruModel, PredictionStore, RobustScaler};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    if args.verbose {
        println!("ValueForge - Customer Value Prediction");
        println!("======================================\n");
    }

    // Pretrained artifacts are mandatory; refuse to start without them.
    let scaler = RobustScaler::load(&args.scaler).context("loading scaler parameters")?;
    let model = GruModel::load(&args.weights).context("loading model weights")?;

    run_prediction(&args, &scaler, &model)
}

/// Run the full prediction pipeline and report the serving views
fn run_prediction(args: &Args, scaler: &RobustScaler, model: &GruModel) -> Result<()> {
    println!("=== Prediction Pipeline ===\n");

    let start_time = Instant::now();

    // Step 1: Load and validate transactions
    if args.verbose {
        println!("Step 1: Loading transactions");
        println!("  Input file: {}", args.input);
    }

    let data_start = Instant::now();
    let transactions = data::load_transactions(&args.input)?;
    let data_time = data_start.elapsed();

    println!("✓ Data loaded: {} transaction rows", transactions.len());
    if args.verbose {
        println!("  Loading time: {:.2}s", data_time.as_secs_f64());
    }

    // Step 2: Preprocess and predict
    if args.verbose {
        println!("\nStep 2: Preprocessing and prediction");
    }

    let predict_start = Instant::now();
    let records = pipeline::predict(transactions, scaler, model)?;
    let predict_time = predict_start.elapsed();

    println!("✓ Predictions computed for {} customers", records.len());
    if args.verbose {
        println!("  Prediction time: {:.2}s", predict_time.as_secs_f64());
    }

    // Step 3: Publish the batch and print the serving views
    let store = PredictionStore::new();
    store.publish(records);
    let batch = store.snapshot()?;

    println!("\n=== Top {} Customers ===", args.top);
    for record in batch.top_n(args.top) {
        println!("Customer {}: {:.4}", record.customer_id, record.prediction);
    }

    let metrics = batch.metrics();
    println!("\n=== Prediction Metrics ===");
    println!("Count: {}", metrics.count);
    println!("Mean:  {:.4}", metrics.mean);
    println!("Std:   {:.4}", metrics.std);
    println!("P50:   {:.4}", metrics.p50);
    println!("P75:   {:.4}", metrics.p75);
    println!("P90:   {:.4}", metrics.p90);
    println!("Max:   {:.4}", metrics.max);

    let segmentation = batch.segment();
    println!("\n=== Customer Segmentation ===");
    println!(
        "High value:   {} customers (>= {:.4})",
        segmentation.high.len(),
        segmentation.p90
    );
    println!(
        "Medium value: {} customers ({:.4} - {:.4})",
        segmentation.medium.len(),
        segmentation.p75,
        segmentation.p90
    );
    println!(
        "Low value:    {} customers (< {:.4})",
        segmentation.low.len(),
        segmentation.p75
    );

    // Step 4: Optional CSV export
    if let Some(ref export_path) = args.export {
        std::fs::write(export_path, batch.to_csv()?)
            .with_context(|| format!("writing prediction export to {export_path}"))?;
        println!("\n✓ Predictions exported to: {export_path}");
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());

    Ok(())
}
