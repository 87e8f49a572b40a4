//! Command-line interface definitions and argument parsing

use clap::Parser;

/// Customer value prediction from retail transaction logs using a pretrained GRU
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transaction CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Path to the pretrained robust-scaler parameter file (JSON)
    #[arg(short, long, default_value = "robust_scaler.json")]
    pub scaler: String,

    /// Path to the pretrained GRU weight file (JSON)
    #[arg(short, long, default_value = "gru_weights.json")]
    pub weights: String,

    /// Number of top customers to report
    #[arg(short = 'n', long, default_value = "50")]
    pub top: usize,

    /// Optional output path for the prediction CSV export
    #[arg(short, long)]
    pub export: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
