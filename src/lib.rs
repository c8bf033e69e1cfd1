pub mod cli;
pub mod condition;
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod formula;
pub mod io_utils;
pub mod mapping;
pub mod predicate;
pub mod preprocess;
pub mod progress;
pub mod rates;
pub mod reconcile;
pub mod report;
pub mod row;
pub mod stream;
pub mod table;
pub mod transform;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{CheckArgs, Cli, Commands, PreviewArgs, ReconcileArgs, SideArg},
    config::ConfigDocument,
    driver::BatchOptions,
    progress::RunHooks,
    rates::{RateTable, SystemClock},
    transform::{StepContext, preview_pipeline},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("recon_managed", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Reconcile(args) => handle_reconcile(&args),
        Commands::Preview(args) => handle_preview(&args),
        Commands::Check(args) => handle_check(&args),
    }
}

fn handle_reconcile(args: &ReconcileArgs) -> Result<()> {
    let mut document = ConfigDocument::load(&args.config)?;
    for spec in &args.source_virtuals {
        let field = formula::VirtualField::parse_shorthand(spec).map_err(|e| anyhow!(e))?;
        document.virtual_fields.source.push(field);
    }
    for spec in &args.target_virtuals {
        let field = formula::VirtualField::parse_shorthand(spec).map_err(|e| anyhow!(e))?;
        document.virtual_fields.target.push(field);
    }
    let source_delimiter = io_utils::resolve_input_delimiter(&args.source, args.delimiter);
    let target_delimiter = io_utils::resolve_input_delimiter(&args.target, args.delimiter);
    let source_encoding = io_utils::resolve_encoding(args.source_encoding.as_deref())?;
    let target_encoding = io_utils::resolve_encoding(args.target_encoding.as_deref())?;

    info!(
        "Reconciling '{}' against '{}'",
        args.source.display(),
        args.target.display()
    );
    let source_rows = io_utils::read_rows(&args.source, source_delimiter, source_encoding)
        .with_context(|| format!("Reading source rows from {:?}", args.source))?;
    let target_rows = io_utils::read_rows(&args.target, target_delimiter, target_encoding)
        .with_context(|| format!("Reading target rows from {:?}", args.target))?;

    let rates = parse_rate_table(&args.rates)?;
    let clock = SystemClock;
    let options = BatchOptions {
        rates: &rates,
        clock: &clock,
        assume_sorted: args.assume_sorted,
    };

    let report = driver::reconcile_rows(
        &document,
        source_rows,
        target_rows,
        &options,
        &RunHooks::new(),
    )?;

    let verdicts: Vec<_> = match args.limit {
        Some(limit) => report.verdicts.iter().take(limit).cloned().collect(),
        None => report.verdicts.clone(),
    };

    if args.table && args.output.is_none() {
        let headers = io_utils::verdict_headers(&document.mappings);
        let rows: Vec<Vec<String>> = verdicts
            .iter()
            .map(|v| io_utils::verdict_record(v, &document.mappings))
            .collect();
        table::print_table(&headers, &rows);
    } else {
        let output_delimiter = args
            .output
            .as_deref()
            .map(|p| io_utils::resolve_input_delimiter(p, args.delimiter))
            .unwrap_or(source_delimiter);
        io_utils::write_verdicts(
            args.output.as_deref(),
            output_delimiter,
            &verdicts,
            &document.mappings,
        )?;
    }

    let counts = report.counts();
    info!(
        "{} matched, {} discrepancies, {} unmatched source, {} unmatched target ({} source / {} target row(s) excluded)",
        counts.matched,
        counts.discrepancy,
        counts.unmatched_source,
        counts.unmatched_target,
        report.dropped_source,
        report.dropped_target
    );
    Ok(())
}

fn handle_preview(args: &PreviewArgs) -> Result<()> {
    let document = ConfigDocument::load(&args.config)?;
    document.validate()?;

    let pipelines = match args.side {
        SideArg::Source => &document.transformations.source,
        SideArg::Target => &document.transformations.target,
    };
    let pipeline = pipelines
        .iter()
        .find(|p| p.column_id == args.column || p.id == args.column)
        .ok_or_else(|| {
            anyhow!(
                "No pipeline for column '{}' on the {} side",
                args.column,
                match args.side {
                    SideArg::Source => "source",
                    SideArg::Target => "target",
                }
            )
        })?;

    let rates = parse_rate_table(&args.rates)?;
    let clock = SystemClock;
    let ctx = StepContext {
        rates: &rates,
        clock: &clock,
    };
    let trace = preview_pipeline(data::parse_cell(&args.value), pipeline, &ctx);

    let headers = vec![
        "step".to_string(),
        "kind".to_string(),
        "input".to_string(),
        "output".to_string(),
        "error".to_string(),
    ];
    let rows: Vec<Vec<String>> = trace
        .iter()
        .map(|outcome| {
            vec![
                outcome.step_id.clone(),
                outcome.kind.to_string(),
                outcome.input.as_display(),
                outcome.output.as_display(),
                outcome
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    table::print_table(&headers, &rows);
    Ok(())
}

fn handle_check(args: &CheckArgs) -> Result<()> {
    let document = ConfigDocument::load(&args.config)?;
    document.validate()?;
    info!(
        "Config {:?} is valid: {} mapping(s), {} virtual field(s), {} pipeline(s)",
        args.config,
        document.mappings.len(),
        document.virtual_fields.source.len() + document.virtual_fields.target.len(),
        document.transformations.source.len() + document.transformations.target.len()
    );
    Ok(())
}

/// Parses repeatable `FROM:TO=RATE` flags into a rate table.
fn parse_rate_table(specs: &[String]) -> Result<RateTable> {
    let mut table = RateTable::new();
    for spec in specs {
        let (pair, rate) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("Rate '{spec}' must look like USD:EUR=0.93"))?;
        let (from, to) = pair
            .split_once(':')
            .ok_or_else(|| anyhow!("Rate '{spec}' must name a FROM:TO currency pair"))?;
        let rate: f64 = rate
            .trim()
            .parse()
            .with_context(|| format!("Parsing rate value in '{spec}'"))?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(anyhow!("Rate in '{spec}' must be a positive number"));
        }
        table.insert(from.trim(), to.trim(), rate);
    }
    Ok(table)
}
