//! Driving the pipeline for each archive, and joining the results.
//!
//! Each archive goes through the same stages, strictly in order. Archives are independent of
//! each other, so they are processed in parallel, and their outcomes are folded into the
//! run-wide [`Aggregator`] once every archive has finished.
use crate::{
    aggregate::{Aggregator, ArchiveReport, CcgCounts, PatientRow},
    archive::ArchiveMembers,
    classify::{classify, Criteria},
    lookup::ReferenceTables,
    resolve::{resolve, CcgCursor, FailureTally},
    ArcStr, Diagnostics, InrEvents, Patients, Plans,
};
use qu::ick_use::*;
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// Where an archive has got to in the pipeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Stage {
    Extracted,
    PatientsParsed,
    EventsParsed,
    PlansResolved,
    PatientsMerged,
    Aggregated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Extracted => "extracting archive",
            Stage::PatientsParsed => "reading patient file",
            Stage::EventsParsed => "reading INR file",
            Stage::PlansResolved => "resolving CCGs",
            Stage::PatientsMerged => "merging patients",
            Stage::Aggregated => "aggregating",
        };
        f.write_str(name)
    }
}

/// Everything one archive contributes to the run.
#[derive(Debug)]
pub struct ArchiveOutcome {
    /// Counts for every CCG any plan in the archive resolved to.
    pub ccgs: BTreeMap<ArcStr, CcgCounts>,
    pub patients: Vec<PatientRow>,
    pub diagnoses: BTreeSet<ArcStr>,
    pub report: ArchiveReport,
    pub diagnostics: Diagnostics,
}

impl ArchiveOutcome {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            ccgs: BTreeMap::new(),
            patients: vec![],
            diagnoses: BTreeSet::new(),
            report: ArchiveReport {
                name: name.into(),
                plans: 0,
                events: 0,
                failures: FailureTally::default(),
                skipped: None,
            },
            diagnostics: Diagnostics::new(),
        }
    }
}

/// Run the whole pipeline for one archive.
///
/// Errors here (duplicate plans, INR events for unknown plans, unreadable files) are fatal to
/// the run. An archive without the right files is skipped instead, and says so in its report.
pub fn process_archive(
    name: &str,
    reader: impl io::Read + io::Seek,
    tables: &ReferenceTables,
    criteria: &Criteria,
) -> Result<ArchiveOutcome> {
    let mut outcome = ArchiveOutcome::empty(name);
    let mut stage = Stage::Extracted;
    let result = run_stages(&mut outcome, &mut stage, reader, tables, criteria);
    result.with_context(|| format!("processing \"{}\" failed while {}", name, stage))?;
    Ok(outcome)
}

fn run_stages(
    outcome: &mut ArchiveOutcome,
    stage: &mut Stage,
    reader: impl io::Read + io::Seek,
    tables: &ReferenceTables,
    criteria: &Criteria,
) -> Result {
    let name = outcome.report.name.clone();
    let diagnostics = &mut outcome.diagnostics;

    let members = match ArchiveMembers::from_zip(&name, reader, diagnostics)? {
        Ok(members) => members,
        Err(incomplete) => {
            diagnostics.warn(format!("skipping {}: {}", name, incomplete));
            outcome.report.skipped = Some(incomplete.to_string());
            return Ok(());
        }
    };

    *stage = Stage::PatientsParsed;
    let plans = Plans::from_reader(&*members.patients)
        .with_context(|| format!("in \"{}\"", members.patient_name))?;
    outcome.report.plans = plans.len();
    outcome.diagnoses.extend(plans.diagnoses().cloned());

    *stage = Stage::EventsParsed;
    let events = InrEvents::from_reader(&*members.inr, &plans, diagnostics)
        .with_context(|| format!("in \"{}\"", members.inr_name))?;
    outcome.report.events = events.len();
    event!(
        Level::DEBUG,
        "{}: {} plans, {} INR events, horizon {}",
        name,
        plans.len(),
        events.len(),
        events.horizon()
    );

    // Resolution must happen in file order: the cursor depends on it.
    *stage = Stage::PlansResolved;
    let mut cursor = CcgCursor::new();
    for plan in plans.iter() {
        match resolve(plan, tables, &mut cursor) {
            Ok(resolution) => plan.set_resolved_ccg(resolution.ccg)?,
            Err(reason) => outcome.report.failures.record(reason),
        }
    }
    diagnostics.info(format!(
        "{} has {}",
        name,
        serde_json::to_string(&outcome.report.failures)?
    ));

    // Merging is also in file order, so the last plan wins for a patient's CCG and TTR.
    *stage = Stage::PatientsMerged;
    let mut patients = Patients::from_plans(&plans);
    for plan in plans.iter() {
        let Some(ccg) = plan.resolved_ccg() else {
            continue;
        };
        let classification = classify(
            events.for_plan(&plan.plan_id),
            plan.ttr,
            events.horizon(),
            criteria,
        );
        let patient = patients
            .find_by_id_mut(&plan.patient_id)
            .ok_or_else(|| format_err!("no patient with ID {}", plan.patient_id))?;
        patient
            .summary
            .merge(&plan.patient_id, ccg, &classification, diagnostics);
    }

    *stage = Stage::Aggregated;
    outcome.ccgs = cursor
        .encountered()
        .iter()
        .map(|ccg| (ccg.clone(), CcgCounts::default()))
        .collect();
    for patient in patients.iter() {
        let summary = &patient.summary;
        let Some(ccg) = summary.countable() else {
            if summary.ccg.is_some() {
                diagnostics.warn(format!(
                    "might have some data for: {} (no usable TTR)",
                    patient.patient_id
                ));
            }
            continue;
        };
        outcome
            .ccgs
            .entry(ccg.clone())
            .or_default()
            .count_patient(summary);
        outcome.patients.push(PatientRow {
            patient_id: patient.patient_id.clone(),
            ccg: ccg.clone(),
            low_inr: summary.low_inr,
            high_inr: summary.high_inr,
            low_ttr: summary.low_ttr,
        });
    }
    Ok(())
}

/// All archives in a directory, sorted by name.
pub fn discover_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    fn inner(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = vec![];
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }
    inner(dir).with_context(|| format!("listing archives in \"{}\"", dir.display()))
}

/// Process every archive in `input_dir` and join the results.
///
/// Archives run in parallel, but are folded into the aggregate in name order so the output is
/// the same from run to run. Any fatal error aborts the whole run.
pub fn run(input_dir: &Path, tables: &ReferenceTables, criteria: &Criteria) -> Result<Aggregator> {
    let paths = discover_archives(input_dir)?;
    let total = paths.len();
    event!(
        Level::INFO,
        "{} archives found in \"{}\"",
        total,
        input_dir.display()
    );

    let outcomes = paths
        .par_iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let file = fs::File::open(path)
                .with_context(|| format!("opening \"{}\"", path.display()))?;
            process_archive(&name, io::BufReader::new(file), tables, criteria)
        })
        .collect::<Result<Vec<ArchiveOutcome>>>()?;

    // Join: nothing is reported until every archive has finished.
    ensure!(
        outcomes.len() == total,
        "only {} of {} archives completed",
        outcomes.len(),
        total
    );
    let mut aggregator = Aggregator::new();
    for outcome in outcomes {
        aggregator.accumulate(outcome);
    }
    event!(Level::INFO, "{}/{} archives processed", total, total);
    Ok(aggregator)
}
