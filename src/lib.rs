pub mod aggregate;
pub mod archive;
pub mod batch;
pub mod classify;
pub mod config;
pub mod lookup;
pub mod report;
pub mod resolve;
mod util;

pub use anyhow::{Context, Error};
use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use qu::ick_use::*;
use serde::Deserialize;
use std::{collections::BTreeMap, io, ops::Deref, sync::Arc};

pub use crate::{
    aggregate::{Aggregator, CcgCounts, PatientRow, PatientSummary},
    batch::{process_archive, run, ArchiveOutcome},
    classify::{classify, Classification, Criteria},
    config::Config,
    lookup::ReferenceTables,
    resolve::{resolve, CcgCursor, FailureReason, FailureTally, Resolution},
    util::{header, path_exists, Diagnostics},
};
use crate::util::{
    inr_value, lenient_uk_date, optional_f64, optional_string, parse_uk_date, ttr_percent,
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = ArcStr;
pub type PlanId = ArcStr;

/// The first column name of the patient file. Rows starting with this are header rows.
const PATIENT_HEADER: &str = "ExpandedUniquePatientID";
/// The first column name of the INR file.
const INR_HEADER: &str = "ExpandedUniqueTreatmentPlanID";

/// The horizon used for an archive with no valid INR dates at all.
pub fn default_horizon() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 2, 1).unwrap()
}

/// Problems with an archive's data that mean we can't trust any of the run's output.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("treatment plan ID \"{plan_id}\" appears more than once in the patient file")]
    DuplicatePlan { plan_id: PlanId },
    #[error("INR record references unknown treatment plan ID \"{plan_id}\"")]
    UnknownPlan { plan_id: PlanId },
}

/// A row in the patient file, by position.
#[derive(Debug, Clone, Deserialize)]
struct PlanRaw {
    patient_id: PatientId,
    plan_id: PlanId,
    #[serde(deserialize_with = "optional_string")]
    outer_postcode: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    practice_code: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    practice_name: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    gp_postcode: Option<ArcStr>,
    #[serde(deserialize_with = "ttr_percent")]
    ttr: Option<f64>,
    #[serde(deserialize_with = "optional_f64")]
    target_low: Option<f64>,
    #[serde(deserialize_with = "optional_f64")]
    target_high: Option<f64>,
    diagnosis: ArcStr,
    #[serde(deserialize_with = "lenient_uk_date")]
    start_date: Option<NaiveDate>,
}

/// One treatment plan: a patient's anticoagulation monitoring episode at a clinic.
///
/// A patient may have more than one plan. Everything is fixed at load time apart from the
/// resolved CCG, which can be set once.
#[derive(Debug, Clone)]
pub struct TreatmentPlan {
    pub plan_id: PlanId,
    pub patient_id: PatientId,
    /// Where the patient lives (outward code only).
    pub outer_postcode: Option<ArcStr>,
    pub practice_code: Option<ArcStr>,
    pub practice_name: Option<ArcStr>,
    /// The GP practice's postcode.
    pub postcode: Option<ArcStr>,
    /// Percentage time in therapeutic range. `None` if the export contained something other
    /// than a number.
    pub ttr: Option<f64>,
    pub target_low: Option<f64>,
    pub target_high: Option<f64>,
    pub diagnosis: ArcStr,
    pub start_date: Option<NaiveDate>,
    resolved_ccg: OnceCell<ArcStr>,
}

impl From<PlanRaw> for TreatmentPlan {
    fn from(from: PlanRaw) -> Self {
        Self {
            plan_id: from.plan_id,
            patient_id: from.patient_id,
            outer_postcode: from.outer_postcode,
            practice_code: from.practice_code,
            practice_name: from.practice_name,
            postcode: from.gp_postcode,
            ttr: from.ttr,
            target_low: from.target_low,
            target_high: from.target_high,
            diagnosis: from.diagnosis,
            start_date: from.start_date,
            resolved_ccg: OnceCell::new(),
        }
    }
}

impl TreatmentPlan {
    /// A plan with no location information and a TTR of 0.
    pub fn new(patient_id: impl Into<PatientId>, plan_id: impl Into<PlanId>) -> Self {
        Self {
            plan_id: plan_id.into(),
            patient_id: patient_id.into(),
            outer_postcode: None,
            practice_code: None,
            practice_name: None,
            postcode: None,
            ttr: Some(0.),
            target_low: None,
            target_high: None,
            diagnosis: "".into(),
            start_date: None,
            resolved_ccg: OnceCell::new(),
        }
    }

    /// The CCG this plan was resolved to, if resolution has run and succeeded.
    pub fn resolved_ccg(&self) -> Option<&ArcStr> {
        self.resolved_ccg.get()
    }

    pub(crate) fn set_resolved_ccg(&self, ccg: ArcStr) -> Result {
        self.resolved_ccg
            .set(ccg)
            .map_err(|_| format_err!("plan \"{}\" has already been resolved", self.plan_id))
    }
}

/// All treatment plans from one patient file, in file order, with an index on the plan ID.
#[derive(Debug)]
pub struct Plans {
    els: Vec<TreatmentPlan>,
    id_idx: BTreeMap<PlanId, usize>,
}

impl Plans {
    /// Parse a tab-separated patient file.
    ///
    /// Fails with [`IntegrityError::DuplicatePlan`] if a plan ID appears twice.
    pub fn from_reader(reader: impl io::Read) -> Result<Self> {
        let mut rdr = tab_reader(reader);
        let mut els = vec![];
        for record in rdr.records() {
            let record = record?;
            if record.get(0) == Some(PATIENT_HEADER) {
                continue;
            }
            let raw: PlanRaw = record.deserialize(None)?;
            els.push(raw.into());
        }
        Self::new(els)
    }

    pub fn new(els: Vec<TreatmentPlan>) -> Result<Self> {
        let mut id_idx = BTreeMap::new();
        for (idx, plan) in els.iter().enumerate() {
            if id_idx.insert(plan.plan_id.clone(), idx).is_some() {
                return Err(IntegrityError::DuplicatePlan {
                    plan_id: plan.plan_id.clone(),
                }
                .into());
            }
        }
        Ok(Self { els, id_idx })
    }

    pub fn find_by_id(&self, id: &str) -> Option<&TreatmentPlan> {
        let idx = self.id_idx.get(id)?;
        self.els.get(*idx)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_idx.contains_key(id)
    }

    /// Diagnosis labels of all plans, skipping blanks. May contain duplicates.
    pub fn diagnoses(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.els
            .iter()
            .map(|plan| &plan.diagnosis)
            .filter(|d| !d.is_empty())
    }
}

impl Deref for Plans {
    type Target = [TreatmentPlan];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

/// A patient and the plans they own, plus the summary built up as those plans are merged.
#[derive(Debug, Clone)]
pub struct Patient {
    pub patient_id: PatientId,
    /// Indexes into the owning `Plans`, in file order.
    pub plan_idxs: Vec<usize>,
    pub summary: PatientSummary,
}

/// The patients in one patient file, in order of first appearance.
#[derive(Debug)]
pub struct Patients {
    els: Vec<Patient>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl Patients {
    pub fn from_plans(plans: &Plans) -> Self {
        let mut this = Self {
            els: vec![],
            id_idx: BTreeMap::new(),
        };
        for (plan_idx, plan) in plans.iter().enumerate() {
            let idx = match this.id_idx.get(&plan.patient_id) {
                Some(idx) => *idx,
                None => {
                    this.els.push(Patient {
                        patient_id: plan.patient_id.clone(),
                        plan_idxs: vec![],
                        summary: PatientSummary::default(),
                    });
                    this.id_idx
                        .insert(plan.patient_id.clone(), this.els.len() - 1);
                    this.els.len() - 1
                }
            };
            this.els[idx].plan_idxs.push(plan_idx);
        }
        this
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Patient> {
        let idx = self.id_idx.get(id)?;
        self.els.get(*idx)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Patient> {
        let idx = self.id_idx.get(id)?;
        self.els.get_mut(*idx)
    }
}

impl Deref for Patients {
    type Target = [Patient];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

#[derive(Debug, Deserialize)]
struct InrRaw {
    plan_id: PlanId,
    date: String,
    #[serde(deserialize_with = "inr_value")]
    value: Option<f64>,
    #[serde(deserialize_with = "optional_string")]
    treatment_id: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    status: Option<ArcStr>,
}

/// A single INR measurement.
///
/// `date` and `value` are `None` when the export had something unparsable in them. Such events
/// never count towards any of the risk criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct InrEvent {
    pub plan_id: PlanId,
    pub date: Option<NaiveDate>,
    pub value: Option<f64>,
    pub treatment_id: Option<ArcStr>,
    pub status: Option<ArcStr>,
}

impl InrEvent {
    pub fn new(plan_id: impl Into<PlanId>, date: NaiveDate, value: f64) -> Self {
        Self {
            plan_id: plan_id.into(),
            date: Some(date),
            value: Some(value),
            treatment_id: None,
            status: None,
        }
    }
}

/// The INR events of one archive, grouped by treatment plan, along with the archive's horizon
/// date (the latest valid event date).
#[derive(Debug)]
pub struct InrEvents {
    by_plan: BTreeMap<PlanId, Vec<InrEvent>>,
    horizon: NaiveDate,
    len: usize,
}

impl InrEvents {
    /// Parse a tab-separated INR file.
    ///
    /// Every event must belong to a plan in `plans`, otherwise we fail with
    /// [`IntegrityError::UnknownPlan`].
    pub fn from_reader(
        reader: impl io::Read,
        plans: &Plans,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let mut rdr = tab_reader(reader);
        let mut els = vec![];
        for record in rdr.records() {
            let record = record?;
            if record.get(0) == Some(INR_HEADER) {
                continue;
            }
            let raw: InrRaw = record.deserialize(None)?;
            let date = parse_uk_date(&raw.date);
            if date.is_none() {
                diagnostics.warn(format!(
                    "INR date \"{}\" for treatment plan {} could not be read",
                    raw.date, raw.plan_id
                ));
            }
            els.push(InrEvent {
                plan_id: raw.plan_id,
                date,
                value: raw.value,
                treatment_id: raw.treatment_id,
                status: raw.status,
            });
        }
        Self::new(els, plans)
    }

    pub fn new(els: impl IntoIterator<Item = InrEvent>, plans: &Plans) -> Result<Self> {
        let mut by_plan: BTreeMap<PlanId, Vec<InrEvent>> = BTreeMap::new();
        let mut horizon = default_horizon();
        let mut len = 0;
        for event in els {
            if !plans.contains(&event.plan_id) {
                return Err(IntegrityError::UnknownPlan {
                    plan_id: event.plan_id,
                }
                .into());
            }
            match event.date {
                Some(date) if date > horizon => horizon = date,
                _ => (),
            }
            len += 1;
            by_plan
                .entry(event.plan_id.clone())
                .or_insert_with(Vec::new)
                .push(event);
        }
        Ok(Self {
            by_plan,
            horizon,
            len,
        })
    }

    /// Events for a plan, in file order. Plans without events get an empty slice.
    pub fn for_plan(&self, plan_id: &str) -> &[InrEvent] {
        self.by_plan.get(plan_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The latest event date in the archive, which is used as "now" when classifying.
    pub fn horizon(&self) -> NaiveDate {
        self.horizon
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn tab_reader<R: io::Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

#[cfg(test)]
mod test {
    use super::*;

    const PATIENTS: &str = "\
ExpandedUniquePatientID\tExpandedUniqueTreatmentPlanID\tLocation_OuterPostcode\tGP_PracticeCode\tGP_PracticeName\tGP_Postcode\t% Time In Range\tTargetRange_LowerLimit\tTargetRange_UpperLimit\tDiagnosis\tTreatmentPlanStartDate
P1\tT1\tAB1\tA12345\tThe Surgery\tAB1 2CD\t72.5\t2\t3\tAtrial fibrillation\t01/03/2015
P2\tT2\tNULL\t\t\t\t\t2.5\t3.5\tDVT\t
P1\tT3\tAB1\tA12345\tThe Surgery\tAB1 2CD\tn/a\t2\t3\tAtrial fibrillation\t01/03/2016
";

    #[test]
    fn parse_patient_file() {
        let plans = Plans::from_reader(PATIENTS.as_bytes()).unwrap();
        assert_eq!(plans.len(), 3);

        let t1 = plans.find_by_id("T1").unwrap();
        assert_eq!(&*t1.patient_id, "P1");
        assert_eq!(t1.practice_code.as_deref(), Some("A12345"));
        assert_eq!(t1.postcode.as_deref(), Some("AB1 2CD"));
        assert_eq!(t1.ttr, Some(72.5));
        assert_eq!(t1.start_date, NaiveDate::from_ymd_opt(2015, 3, 1));

        let t2 = plans.find_by_id("T2").unwrap();
        assert_eq!(t2.outer_postcode, None);
        assert_eq!(t2.practice_code, None);
        assert_eq!(t2.postcode, None);
        // empty TTR means 0%
        assert_eq!(t2.ttr, Some(0.));

        assert_eq!(plans.find_by_id("T3").unwrap().ttr, None);
        assert!(plans.find_by_id("T4").is_none());
        assert_eq!(plans.diagnoses().count(), 3);
    }

    #[test]
    fn patients_keep_plan_order() {
        let plans = Plans::from_reader(PATIENTS.as_bytes()).unwrap();
        let patients = Patients::from_plans(&plans);
        assert_eq!(patients.len(), 2);
        assert_eq!(&*patients[0].patient_id, "P1");
        assert_eq!(patients[0].plan_idxs, vec![0, 2]);
        assert_eq!(patients.find_by_id("P2").unwrap().plan_idxs, vec![1]);
    }

    #[test]
    fn duplicate_plan_is_fatal() {
        let input = "P1\tT1\t\t\t\t\t50\t\t\tAF\t\nP2\tT1\t\t\t\t\t60\t\t\tAF\t\n";
        let err = Plans::from_reader(input.as_bytes()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<IntegrityError>(),
            Some(IntegrityError::DuplicatePlan { plan_id }) if &**plan_id == "T1"
        ));
    }

    #[test]
    fn parse_inr_file() {
        let plans = Plans::from_reader(PATIENTS.as_bytes()).unwrap();
        let input = "\
ExpandedUniqueTreatmentPlanID\tdINRDate\tINR_Value\tpkiTreatmentID\tcStatus
T1\t01/06/2017\t2.4\t100\tA
T1\t15/06/2017\t5.5\t101\tA
T2\t20/05/2017\tx\t102\tA
T2\tnot a date\t9\t103\tA
T3\t02/06/2017\t\t104\tA
";
        let mut diagnostics = Diagnostics::new();
        let events = InrEvents::from_reader(input.as_bytes(), &plans, &mut diagnostics)
            .unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events.horizon(),
            NaiveDate::from_ymd_opt(2017, 6, 15).unwrap()
        );
        assert_eq!(events.for_plan("T1").len(), 2);
        assert_eq!(events.for_plan("T1")[1].value, Some(5.5));
        assert_eq!(events.for_plan("T2")[0].value, None);
        assert_eq!(events.for_plan("T2")[1].date, None);
        // empty reads as 0
        assert_eq!(events.for_plan("T3")[0].value, Some(0.));
        assert!(events.for_plan("T4").is_empty());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn unknown_plan_is_fatal() {
        let plans = Plans::from_reader(PATIENTS.as_bytes()).unwrap();
        let input = "T9\t01/06/2017\t2.4\t100\tA\n";
        let err = InrEvents::from_reader(input.as_bytes(), &plans, &mut Diagnostics::new())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<IntegrityError>(),
            Some(IntegrityError::UnknownPlan { plan_id }) if &**plan_id == "T9"
        ));
    }

    #[test]
    fn no_valid_dates_gives_default_horizon() {
        let plans = Plans::from_reader(PATIENTS.as_bytes()).unwrap();
        let events = InrEvents::new(vec![], &plans).unwrap();
        assert!(events.is_empty());
        assert_eq!(events.horizon(), default_horizon());
    }

    #[test]
    fn resolved_ccg_is_set_once() {
        let plan = TreatmentPlan::new("P1", "T1");
        assert!(plan.resolved_ccg().is_none());
        plan.set_resolved_ccg("North CCG".into()).unwrap();
        assert!(plan.set_resolved_ccg("South CCG".into()).is_err());
        assert_eq!(plan.resolved_ccg().map(|c| &**c), Some("North CCG"));
    }
}
