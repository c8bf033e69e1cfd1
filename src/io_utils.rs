//! CSV reading and writing for the reconciliation CLI.
//!
//! Delimiters resolve from file extensions (`.tsv` is tab, everything else
//! comma) with manual override, input decoding goes through `encoding_rs`
//! (UTF-8 default), and the `-` path convention routes through standard
//! streams. Rows materialize as column-name maps with `__line` provenance
//! attached; verdicts serialize back out as CSV.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::{
    data::parse_cell,
    mapping::ColumnMapping,
    report::Verdict,
    row::Row,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    Ok(open_csv_reader(reader, delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads a whole CSV file into map-shaped rows. Cells are inferred into
/// scalars and each row carries its 1-based file line (header is line 1).
pub fn read_rows(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Vec<Row>> {
    let mut reader = open_csv_reader_from_path(path, delimiter)?;
    let headers = {
        let raw = reader.byte_headers()?.clone();
        decode_record(&raw, encoding)?
    };

    let mut rows = Vec::new();
    for (ordinal, result) in reader.byte_records().enumerate() {
        let record = result.with_context(|| format!("Reading row {}", ordinal + 2))?;
        let decoded = decode_record(&record, encoding)?;
        let mut row = Row::new();
        for (idx, header) in headers.iter().enumerate() {
            let cell = decoded.get(idx).map(String::as_str).unwrap_or("");
            row.insert(header.clone(), parse_cell(cell));
        }
        row.set_line((ordinal + 2) as u64);
        rows.push(row);
    }
    Ok(rows)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    Ok(builder.from_writer(base))
}

/// Verdict CSV header: the fixed verdict columns followed by one
/// source/target value pair per mapping.
pub fn verdict_headers(mappings: &[ColumnMapping]) -> Vec<String> {
    let mut headers = vec![
        "status".to_string(),
        "confidence".to_string(),
        "source_line".to_string(),
        "target_line".to_string(),
        "amount".to_string(),
        "discrepancies".to_string(),
    ];
    for mapping in mappings {
        headers.push(format!("{}_source", mapping.id));
        headers.push(format!("{}_target", mapping.id));
    }
    headers
}

pub fn verdict_record(verdict: &Verdict, mappings: &[ColumnMapping]) -> Vec<String> {
    let mut record = vec![
        verdict.status.to_string(),
        verdict
            .confidence
            .map(|c| format!("{c:.3}"))
            .unwrap_or_default(),
        verdict
            .source_line
            .map(|l| l.to_string())
            .unwrap_or_default(),
        verdict
            .target_line
            .map(|l| l.to_string())
            .unwrap_or_default(),
        verdict
            .amount
            .map(|a| crate::data::Scalar::Float(a).as_display())
            .unwrap_or_default(),
        verdict.discrepancies.join("; "),
    ];
    for mapping in mappings {
        record.push(
            verdict
                .source_row
                .as_ref()
                .map(|row| mapping.project_source(row).as_display())
                .unwrap_or_default(),
        );
        record.push(
            verdict
                .target_row
                .as_ref()
                .map(|row| mapping.project_target(row).as_display())
                .unwrap_or_default(),
        );
    }
    record
}

pub fn write_verdicts(
    path: Option<&Path>,
    delimiter: u8,
    verdicts: &[Verdict],
    mappings: &[ColumnMapping],
) -> Result<()> {
    let mut writer = open_csv_writer(path, delimiter)?;
    writer
        .write_record(verdict_headers(mappings))
        .context("Writing verdict headers")?;
    for verdict in verdicts {
        writer
            .write_record(verdict_record(verdict, mappings))
            .context("Writing verdict row")?;
    }
    writer.flush().context("Flushing verdict output")?;
    Ok(())
}
