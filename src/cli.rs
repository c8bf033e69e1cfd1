use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Reconcile two tabular datasets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile a source CSV against a target CSV using a config document
    Reconcile(ReconcileArgs),
    /// Show the per-step transformation trace for a sample value
    Preview(PreviewArgs),
    /// Validate a config document without processing any rows
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Source CSV file (use '-' for stdin)
    #[arg(short = 's', long = "source")]
    pub source: PathBuf,
    /// Target CSV file
    #[arg(short = 't', long = "target")]
    pub target: PathBuf,
    /// Reconciliation config document (JSON)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Output CSV path (defaults to stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the source file (defaults to utf-8)
    #[arg(long = "source-encoding")]
    pub source_encoding: Option<String>,
    /// Character encoding of the target file (defaults to utf-8)
    #[arg(long = "target-encoding")]
    pub target_encoding: Option<String>,
    /// Exchange rates for currency steps, e.g. `USD:EUR=0.93` (repeatable)
    #[arg(long = "rate", action = clap::ArgAction::Append)]
    pub rates: Vec<String>,
    /// Extra source-side virtual field as `NAME=COLUMN`, aliasing one
    /// physical column (repeatable)
    #[arg(long = "source-virtual", action = clap::ArgAction::Append)]
    pub source_virtuals: Vec<String>,
    /// Extra target-side virtual field as `NAME=COLUMN` (repeatable)
    #[arg(long = "target-virtual", action = clap::ArgAction::Append)]
    pub target_virtuals: Vec<String>,
    /// Trust that both inputs are already sorted by their sort keys
    #[arg(long = "assume-sorted")]
    pub assume_sorted: bool,
    /// Render verdicts as an aligned table instead of CSV (stdout only)
    #[arg(long)]
    pub table: bool,
    /// Limit the number of verdicts written
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SideArg {
    Source,
    Target,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Reconciliation config document (JSON)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Column whose pipeline should be previewed
    #[arg(long)]
    pub column: String,
    /// Sample value to feed through the pipeline
    #[arg(long)]
    pub value: String,
    /// Which side's pipelines to search
    #[arg(long, value_enum, default_value_t = SideArg::Source)]
    pub side: SideArg,
    /// Exchange rates for currency steps, e.g. `USD:EUR=0.93` (repeatable)
    #[arg(long = "rate", action = clap::ArgAction::Append)]
    pub rates: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Reconciliation config document (JSON)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "," | "comma" => Ok(b','),
        "tab" | "\\t" | "t" => Ok(b'\t'),
        ";" | "semicolon" => Ok(b';'),
        "|" | "pipe" => Ok(b'|'),
        other if other.len() == 1 => Ok(other.as_bytes()[0]),
        other => Err(format!(
            "Unsupported delimiter '{other}'. Use ',', 'tab', ';', or '|'"
        )),
    }
}
