//! Folding per-plan results into patients, and patients into CCG counts.
use crate::{
    batch::ArchiveOutcome, resolve::FailureTally, ArcStr, Classification, Diagnostics, PatientId,
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::AddAssign,
};

/// What we know about a patient after merging some or all of their treatment plans.
///
/// The flags are the union over all merged plans. `ccg` and `last_ttr` come from whichever plan
/// was merged last.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PatientSummary {
    pub ccg: Option<ArcStr>,
    pub high_inr: bool,
    pub low_inr: bool,
    /// `None` until a plan is merged, and also when the last plan merged had no usable TTR.
    pub last_ttr: Option<f64>,
    pub low_ttr: bool,
}

impl PatientSummary {
    /// Merge one successfully resolved plan into the summary.
    pub fn merge(
        &mut self,
        patient_id: &str,
        ccg: &ArcStr,
        classification: &Classification,
        diagnostics: &mut Diagnostics,
    ) {
        if let Some(old) = &self.ccg {
            if old != ccg {
                diagnostics.warn(format!(
                    "Patient appears in two CCGs: {} ({} and {})",
                    patient_id, old, ccg
                ));
            }
        }
        self.ccg = Some(ccg.clone());
        self.high_inr |= classification.high_inr;
        self.low_inr |= classification.low_inr;
        self.last_ttr = classification.ttr;
        self.low_ttr |= classification.low_ttr;
    }

    pub fn any(&self) -> bool {
        self.high_inr || self.low_inr || self.low_ttr
    }

    /// Patients only count towards a CCG once they have both a CCG and a TTR.
    pub fn countable(&self) -> Option<&ArcStr> {
        match (&self.ccg, self.last_ttr) {
            (Some(ccg), Some(_)) => Some(ccg),
            _ => None,
        }
    }
}

/// Patient counts for one CCG.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize)]
pub struct CcgCounts {
    /// Patients with 2 INRs > 5 or 1 INR > 8 in the last 6 months.
    pub high_inr: usize,
    /// Patients with an INR < 1.5 in the last 6 months.
    pub low_inr: usize,
    /// Patients with TTR < 65%.
    pub low_ttr: usize,
    /// Patients breaching any of the above.
    pub any_breach: usize,
    pub warfarin_population: usize,
}

impl CcgCounts {
    pub fn count_patient(&mut self, summary: &PatientSummary) {
        if summary.high_inr {
            self.high_inr += 1;
        }
        if summary.low_inr {
            self.low_inr += 1;
        }
        if summary.low_ttr {
            self.low_ttr += 1;
        }
        if summary.any() {
            self.any_breach += 1;
        }
        self.warfarin_population += 1;
    }
}

impl AddAssign<&CcgCounts> for CcgCounts {
    fn add_assign(&mut self, other: &CcgCounts) {
        self.high_inr += other.high_inr;
        self.low_inr += other.low_inr;
        self.low_ttr += other.low_ttr;
        self.any_breach += other.any_breach;
        self.warfarin_population += other.warfarin_population;
    }
}

/// A row in the full patient listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRow {
    #[serde(rename = "Patient ID")]
    pub patient_id: PatientId,
    #[serde(rename = "CCG")]
    pub ccg: ArcStr,
    #[serde(rename = "INR < 1.5 in last 6 months")]
    pub low_inr: bool,
    #[serde(rename = "2 INR > 5 or 1 INR > 8 in last 6 months")]
    pub high_inr: bool,
    #[serde(rename = "TTR < 65%")]
    pub low_ttr: bool,
}

/// Per-archive summary kept for the run report.
#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub name: String,
    pub plans: usize,
    pub events: usize,
    pub failures: FailureTally,
    /// Set when the archive was skipped, with the reason.
    pub skipped: Option<String>,
}

/// The run-wide state every archive is folded into.
#[derive(Debug, Default)]
pub struct Aggregator {
    ccgs: BTreeMap<ArcStr, CcgCounts>,
    patients: Vec<PatientRow>,
    diagnoses: BTreeSet<ArcStr>,
    archives: Vec<ArchiveReport>,
    failures: FailureTally,
    diagnostics: Diagnostics,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one archive's results. CCGs not seen before start from zero.
    pub fn accumulate(&mut self, mut outcome: ArchiveOutcome) {
        for (ccg, counts) in outcome.ccgs.iter() {
            *self.ccgs.entry(ccg.clone()).or_default() += counts;
        }
        self.patients.append(&mut outcome.patients);
        self.diagnoses.extend(outcome.diagnoses);
        self.failures.add(&outcome.report.failures);
        self.archives.push(outcome.report);
        self.diagnostics.append(&mut outcome.diagnostics);
    }

    /// Counts per CCG, ordered by CCG name.
    pub fn ccgs(&self) -> &BTreeMap<ArcStr, CcgCounts> {
        &self.ccgs
    }

    pub fn patients(&self) -> &[PatientRow] {
        &self.patients
    }

    /// All distinct diagnoses, sorted.
    pub fn diagnoses(&self) -> &BTreeSet<ArcStr> {
        &self.diagnoses
    }

    pub fn archives(&self) -> &[ArchiveReport] {
        &self.archives
    }

    /// Failure tally over all archives.
    pub fn failures(&self) -> &FailureTally {
        &self.failures
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn totals(&self) -> CcgCounts {
        let mut total = CcgCounts::default();
        for counts in self.ccgs.values() {
            total += counts;
        }
        total
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::FailureReason;

    fn classification(high_inr: bool, low_inr: bool, ttr: Option<f64>) -> Classification {
        Classification {
            high_inr,
            low_inr,
            ttr,
            low_ttr: matches!(ttr, Some(ttr) if ttr < 65.),
        }
    }

    #[test]
    fn merge_unions_flags_and_keeps_last_ttr() {
        let north: ArcStr = "North CCG".into();
        let mut diagnostics = Diagnostics::new();
        let mut summary = PatientSummary::default();
        assert_eq!(summary.countable(), None);

        summary.merge(
            "P1",
            &north,
            &classification(true, false, Some(40.)),
            &mut diagnostics,
        );
        summary.merge(
            "P1",
            &north,
            &classification(false, true, Some(90.)),
            &mut diagnostics,
        );
        assert!(summary.high_inr);
        assert!(summary.low_inr);
        // flag stays set even though the last plan had a good TTR
        assert!(summary.low_ttr);
        assert_eq!(summary.last_ttr, Some(90.));
        assert!(diagnostics.is_empty());

        summary.merge(
            "P1",
            &north,
            &classification(false, false, Some(70.)),
            &mut diagnostics,
        );
        assert!(summary.high_inr && summary.low_inr && summary.low_ttr);
        assert_eq!(summary.last_ttr, Some(70.));
    }

    #[test]
    fn merge_across_ccgs_warns_and_overwrites() {
        let mut diagnostics = Diagnostics::new();
        let mut summary = PatientSummary::default();
        summary.merge(
            "P1",
            &"North CCG".into(),
            &classification(false, false, Some(80.)),
            &mut diagnostics,
        );
        summary.merge(
            "P1",
            &"South CCG".into(),
            &classification(false, false, Some(80.)),
            &mut diagnostics,
        );
        assert_eq!(summary.ccg.as_deref(), Some("South CCG"));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn no_usable_ttr_is_not_countable() {
        let mut summary = PatientSummary::default();
        summary.merge(
            "P1",
            &"North CCG".into(),
            &classification(true, false, None),
            &mut Diagnostics::new(),
        );
        assert_eq!(summary.countable(), None);
    }

    #[test]
    fn counts() {
        let mut counts = CcgCounts::default();
        counts.count_patient(&PatientSummary {
            ccg: Some("North CCG".into()),
            high_inr: true,
            low_inr: false,
            last_ttr: Some(40.),
            low_ttr: true,
        });
        counts.count_patient(&PatientSummary {
            ccg: Some("North CCG".into()),
            last_ttr: Some(90.),
            ..Default::default()
        });
        assert_eq!(
            counts,
            CcgCounts {
                high_inr: 1,
                low_inr: 0,
                low_ttr: 1,
                any_breach: 1,
                warfarin_population: 2,
            }
        );
    }

    #[test]
    fn accumulate_adds_by_ccg() {
        fn outcome(name: &str, ccgs: &[(&str, CcgCounts)]) -> ArchiveOutcome {
            let mut outcome = ArchiveOutcome::empty(name);
            outcome.ccgs = ccgs
                .iter()
                .map(|(ccg, counts)| (ArcStr::from(*ccg), *counts))
                .collect();
            outcome.diagnoses.insert("AF".into());
            outcome
                .report
                .failures
                .record(FailureReason::NoPracticeCodeNoPostcode);
            outcome
        }
        let one = CcgCounts {
            high_inr: 1,
            low_inr: 0,
            low_ttr: 1,
            any_breach: 1,
            warfarin_population: 3,
        };

        let mut agg = Aggregator::new();
        agg.accumulate(outcome("a.zip", &[("North CCG", one)]));
        agg.accumulate(outcome(
            "b.zip",
            &[("North CCG", one), ("South CCG", CcgCounts::default())],
        ));

        assert_eq!(agg.ccgs().len(), 2);
        assert_eq!(agg.ccgs()["North CCG"].warfarin_population, 6);
        assert_eq!(agg.ccgs()["North CCG"].any_breach, 2);
        assert_eq!(agg.ccgs()["South CCG"], CcgCounts::default());
        assert_eq!(agg.totals().warfarin_population, 6);
        assert_eq!(agg.diagnoses().len(), 1);
        assert_eq!(agg.archives().len(), 2);
        assert_eq!(agg.failures().no_practice_code_no_postcode, 2);
    }
}
