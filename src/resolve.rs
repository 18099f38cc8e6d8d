//! Working out which CCG a treatment plan belongs to.
//!
//! The clinic exports are messy: practice codes sometimes carry a prefix, postcodes have been
//! through OCR, and some plans have no postcode at all. We try, in order,
//!
//!  1. the practice code (after stripping any prefix) against the practice table,
//!  2. the GP postcode (after repairing known OCR damage) via the postcode and CCG tables,
//!  3. the practice name against the practice name table, only when there is no postcode.
//!
//! The first hit wins. A plan that gets nowhere is tallied under one of four failure kinds.
use crate::{lookup::ReferenceTables, ArcStr, TreatmentPlan};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{borrow::Cow, collections::BTreeSet, fmt};

/// A code like `XYZ A12345`: some prefix token, a single space, then the real code.
static PREFIXED_PRACTICE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+ ([A-Za-z]\d{5})$").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
/// An outward code followed by an inward code whose leading `0` was read as the letter `O`.
static OCR_ZERO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{1,2}\d[A-Z\d]?) O([A-Z]{2})$").unwrap());

/// Strip a prefix token from a practice code, e.g. `XYZ A12345` becomes `A12345`.
pub fn normalize_practice_code(code: &str) -> &str {
    let code = code.trim();
    match PREFIXED_PRACTICE_CODE.captures(code) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(code).trim(),
        None => code,
    }
}

/// Collapse runs of spaces to a single space, and trim.
pub fn collapse_spaces(input: &str) -> Cow<'_, str> {
    SPACES.replace_all(input.trim(), " ")
}

/// Collapse spaces, then turn `AB1 OCD` into `AB1 0CD`.
pub fn normalize_postcode(postcode: &str) -> String {
    let collapsed = collapse_spaces(postcode);
    OCR_ZERO.replace(&collapsed, "${1} 0${2}").into_owned()
}

/// Which table a CCG came from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResolvedVia {
    PracticeCode,
    Postcode,
    PracticeName,
}

impl fmt::Display for ResolvedVia {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolvedVia::PracticeCode => f.write_str("practice code"),
            ResolvedVia::Postcode => f.write_str("postcode"),
            ResolvedVia::PracticeName => f.write_str("practice name"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Resolution {
    pub ccg: ArcStr,
    pub via: ResolvedVia,
}

/// Why a plan couldn't be mapped to a CCG.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FailureReason {
    PracticeCodeNotFoundPostcodeNotFound,
    PracticeCodeNotFoundNoPostcode,
    NoPracticeCodePostcodeNotFound,
    NoPracticeCodeNoPostcode,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use FailureReason::*;
        match self {
            PracticeCodeNotFoundPostcodeNotFound => {
                f.write_str("practice code not found, postcode not found")
            }
            PracticeCodeNotFoundNoPostcode => f.write_str("practice code not found, no postcode"),
            NoPracticeCodePostcodeNotFound => f.write_str("no practice code, postcode not found"),
            NoPracticeCodeNoPostcode => f.write_str("no practice code, no postcode"),
        }
    }
}

/// Counts of resolution failures, per archive or summed over a run.
///
/// Serializes with the labels used in the run log.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize)]
pub struct FailureTally {
    #[serde(rename = "PracticeCodeNotFoundPostCodeNotFound")]
    pub practice_code_not_found_postcode_not_found: usize,
    #[serde(rename = "PracticeCodeNotFoundNoPostcode")]
    pub practice_code_not_found_no_postcode: usize,
    #[serde(rename = "NoPracticeCodePostCodeNotFound")]
    pub no_practice_code_postcode_not_found: usize,
    #[serde(rename = "NoPracticeCodeNoPost")]
    pub no_practice_code_no_postcode: usize,
}

impl FailureTally {
    pub fn record(&mut self, reason: FailureReason) {
        *self.get_mut(reason) += 1;
    }

    pub fn get(&self, reason: FailureReason) -> usize {
        use FailureReason::*;
        match reason {
            PracticeCodeNotFoundPostcodeNotFound => self.practice_code_not_found_postcode_not_found,
            PracticeCodeNotFoundNoPostcode => self.practice_code_not_found_no_postcode,
            NoPracticeCodePostcodeNotFound => self.no_practice_code_postcode_not_found,
            NoPracticeCodeNoPostcode => self.no_practice_code_no_postcode,
        }
    }

    fn get_mut(&mut self, reason: FailureReason) -> &mut usize {
        use FailureReason::*;
        match reason {
            PracticeCodeNotFoundPostcodeNotFound => {
                &mut self.practice_code_not_found_postcode_not_found
            }
            PracticeCodeNotFoundNoPostcode => &mut self.practice_code_not_found_no_postcode,
            NoPracticeCodePostcodeNotFound => &mut self.no_practice_code_postcode_not_found,
            NoPracticeCodeNoPostcode => &mut self.no_practice_code_no_postcode,
        }
    }

    pub fn total(&self) -> usize {
        self.practice_code_not_found_postcode_not_found
            + self.practice_code_not_found_no_postcode
            + self.no_practice_code_postcode_not_found
            + self.no_practice_code_no_postcode
    }

    pub fn add(&mut self, other: &FailureTally) {
        self.practice_code_not_found_postcode_not_found +=
            other.practice_code_not_found_postcode_not_found;
        self.practice_code_not_found_no_postcode += other.practice_code_not_found_no_postcode;
        self.no_practice_code_postcode_not_found += other.no_practice_code_postcode_not_found;
        self.no_practice_code_no_postcode += other.no_practice_code_no_postcode;
    }
}

/// Tracks the last CCG resolved in an archive, and every CCG seen so far.
///
/// The encountered set decides which CCGs get a (possibly empty) bucket in the archive's
/// output.
#[derive(Debug, Default, Clone)]
pub struct CcgCursor {
    current: Option<ArcStr>,
    encountered: BTreeSet<ArcStr>,
}

impl CcgCursor {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, ccg: &ArcStr) {
        if self.current.as_ref() != Some(ccg) {
            self.current = Some(ccg.clone());
            self.encountered.insert(ccg.clone());
        }
    }

    pub fn current(&self) -> Option<&ArcStr> {
        self.current.as_ref()
    }

    pub fn encountered(&self) -> &BTreeSet<ArcStr> {
        &self.encountered
    }
}

/// Run the resolution cascade for one plan.
///
/// On success the cursor is moved to the resolved CCG.
pub fn resolve(
    plan: &TreatmentPlan,
    tables: &ReferenceTables,
    cursor: &mut CcgCursor,
) -> Result<Resolution, FailureReason> {
    let resolution = resolve_fields(
        plan.practice_code.as_deref(),
        plan.postcode.as_deref(),
        plan.practice_name.as_deref(),
        tables,
    )?;
    cursor.observe(&resolution.ccg);
    Ok(resolution)
}

/// The cascade itself, on raw field values.
pub fn resolve_fields(
    practice_code: Option<&str>,
    postcode: Option<&str>,
    practice_name: Option<&str>,
    tables: &ReferenceTables,
) -> Result<Resolution, FailureReason> {
    use FailureReason::*;

    let practice_code = practice_code
        .map(normalize_practice_code)
        .filter(|code| !code.is_empty());
    let postcode = postcode
        .map(normalize_postcode)
        .filter(|postcode| !postcode.is_empty());
    let practice_name = practice_name
        .map(str::trim)
        .filter(|name| !name.is_empty());

    if let Some(code) = practice_code {
        if let Some(ccg) = tables.ccg_for_practice(code) {
            return Ok(Resolution {
                ccg: ccg.clone(),
                via: ResolvedVia::PracticeCode,
            });
        }
    }
    let had_code = practice_code.is_some();

    if let Some(postcode) = postcode {
        return match tables.ccg_for_postcode(&postcode) {
            Some(ccg) => Ok(Resolution {
                ccg: ccg.clone(),
                via: ResolvedVia::Postcode,
            }),
            None if had_code => Err(PracticeCodeNotFoundPostcodeNotFound),
            None => Err(NoPracticeCodePostcodeNotFound),
        };
    }

    if let Some(ccg) = practice_name.and_then(|name| tables.ccg_for_practice_name(name)) {
        return Ok(Resolution {
            ccg: ccg.clone(),
            via: ResolvedVia::PracticeName,
        });
    }

    if had_code {
        Err(PracticeCodeNotFoundNoPostcode)
    } else {
        Err(NoPracticeCodeNoPostcode)
    }
}
