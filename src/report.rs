//! Writing the run's results to disk, and showing them on the console.
use crate::{
    aggregate::{Aggregator, CcgCounts},
    util, ArcStr,
};
use qu::ick_use::*;
use serde::Serialize;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use term_data_table::{Cell, Row, Table};

pub const SUMMARY_FILE: &str = "results.csv";
pub const PATIENTS_FILE: &str = "full_results.csv";
pub const DIAGNOSES_FILE: &str = "diagnoses.csv";
pub const LOG_FILE: &str = "run.log";

/// A row in the per-CCG summary.
#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    #[serde(rename = "CCG")]
    ccg: &'a str,
    #[serde(rename = "High INR incidents")]
    high_inr: usize,
    #[serde(rename = "Low INR incidents")]
    low_inr: usize,
    #[serde(rename = "TTR < 65%")]
    low_ttr: usize,
    #[serde(rename = "Any breach")]
    any_breach: usize,
    #[serde(rename = "Warfarin population")]
    warfarin_population: usize,
}

impl<'a> SummaryRow<'a> {
    fn new(ccg: &'a str, counts: &CcgCounts) -> Self {
        Self {
            ccg,
            high_inr: counts.high_inr,
            low_inr: counts.low_inr,
            low_ttr: counts.low_ttr,
            any_breach: counts.any_breach,
            warfarin_population: counts.warfarin_population,
        }
    }
}

#[derive(Debug, Serialize)]
struct DiagnosisRow<'a> {
    #[serde(rename = "Diagnosis")]
    diagnosis: &'a str,
}

/// Write every report for a finished run into `output_dir`.
///
/// Nothing is written if any of the files already exist, unless `overwrite` is set.
pub fn write_all(
    agg: &Aggregator,
    output_dir: impl AsRef<Path>,
    overwrite: bool,
    write_log: bool,
) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir.as_ref();
    let mut names = vec![SUMMARY_FILE, PATIENTS_FILE, DIAGNOSES_FILE];
    if write_log {
        names.push(LOG_FILE);
    }
    let paths: Vec<PathBuf> = names.iter().map(|name| output_dir.join(name)).collect();
    for path in paths.iter() {
        check_overwrite(path, overwrite)?;
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("could not create \"{}\"", output_dir.display()))?;

    write_summary(agg, &paths[0])?;
    write_patients(agg, &paths[1])?;
    write_diagnoses(agg, &paths[2])?;
    if write_log {
        write_log_file(agg, &paths[3])?;
    }
    Ok(paths)
}

fn check_overwrite(path: &Path, overwrite: bool) -> Result {
    if util::path_exists(path)? {
        ensure!(
            overwrite,
            "\"{}\" already exists (use --overwrite to replace it)",
            path.display()
        );
        event!(
            Level::WARN,
            "overwriting existing file at \"{}\"",
            path.display()
        );
    }
    Ok(())
}

/// Per-CCG counts, CCGs in name order.
pub fn write_summary(agg: &Aggregator, path: &Path) -> Result {
    let rows = agg
        .ccgs()
        .iter()
        .map(|(ccg, counts)| SummaryRow::new(ccg, counts));
    save_csv(rows, path)
}

/// One row per counted patient.
pub fn write_patients(agg: &Aggregator, path: &Path) -> Result {
    save_csv(agg.patients().iter(), path)
}

/// Every distinct diagnosis, sorted.
pub fn write_diagnoses(agg: &Aggregator, path: &Path) -> Result {
    let rows = agg
        .diagnoses()
        .iter()
        .map(|diagnosis| DiagnosisRow { diagnosis });
    save_csv(rows, path)
}

/// Every diagnostic message from the run, one per line.
pub fn write_log_file(agg: &Aggregator, path: &Path) -> Result {
    fn inner(agg: &Aggregator, path: &Path) -> Result {
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        for message in agg.diagnostics() {
            writeln!(out, "{}", message)?;
        }
        out.flush()?;
        Ok(())
    }
    inner(agg, path).with_context(|| format!("unable to save log to \"{}\"", path.display()))
}

fn save_csv<T: Serialize>(rows: impl Iterator<Item = T>, path: &Path) -> Result {
    fn inner<T: Serialize>(rows: impl Iterator<Item = T>, path: &Path) -> Result {
        let mut out = csv::Writer::from_path(path)?;
        for row in rows {
            out.serialize(row)?;
        }
        out.flush()?;
        Ok(())
    }
    inner(rows, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// The per-CCG summary, with a total row.
pub fn ccg_table(agg: &Aggregator) -> Table {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("CCG"))
            .with_cell(Cell::from("High INR"))
            .with_cell(Cell::from("Low INR"))
            .with_cell(Cell::from("TTR < 65%"))
            .with_cell(Cell::from("Any breach"))
            .with_cell(Cell::from("Population")),
    );
    let total: ArcStr = "Total".into();
    let totals = agg.totals();
    for (ccg, counts) in agg.ccgs().iter().chain([(&total, &totals)]) {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(ccg.to_string()))
                .with_cell(Cell::from(counts.high_inr.to_string()))
                .with_cell(Cell::from(counts.low_inr.to_string()))
                .with_cell(Cell::from(counts.low_ttr.to_string()))
                .with_cell(Cell::from(counts.any_breach.to_string()))
                .with_cell(Cell::from(counts.warfarin_population.to_string())),
        );
    }
    table
}

/// What happened to each archive, including why plans couldn't be placed in a CCG.
pub fn archive_table(agg: &Aggregator) -> Table {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Archive"))
            .with_cell(Cell::from("Plans"))
            .with_cell(Cell::from("INR events"))
            .with_cell(Cell::from("Code miss, postcode miss"))
            .with_cell(Cell::from("Code miss, no postcode"))
            .with_cell(Cell::from("No code, postcode miss"))
            .with_cell(Cell::from("No code, no postcode"))
            .with_cell(Cell::from("Skipped")),
    );
    for archive in agg.archives() {
        let failures = &archive.failures;
        table.add_row(
            Row::new()
                .with_cell(Cell::from(archive.name.clone()))
                .with_cell(Cell::from(archive.plans.to_string()))
                .with_cell(Cell::from(archive.events.to_string()))
                .with_cell(Cell::from(
                    failures
                        .practice_code_not_found_postcode_not_found
                        .to_string(),
                ))
                .with_cell(Cell::from(
                    failures.practice_code_not_found_no_postcode.to_string(),
                ))
                .with_cell(Cell::from(
                    failures.no_practice_code_postcode_not_found.to_string(),
                ))
                .with_cell(Cell::from(
                    failures.no_practice_code_no_postcode.to_string(),
                ))
                .with_cell(Cell::from(archive.skipped.clone().unwrap_or_default())),
        );
    }
    table
}
