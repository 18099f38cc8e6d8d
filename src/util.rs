use crate::ArcStr;
use chrono::{NaiveDate, NaiveDateTime};
use qu::ick_use::*;
use serde::{Deserialize, Deserializer};
use std::{fs, io, path::Path, slice};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Parse a string, but map "null" to `None` (in addition to the default "" -> None mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    if s.eq_ignore_ascii_case("null") || s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s.into()))
    }
}

/// Parse a number, mapping anything that isn't a finite number to `None`.
pub fn optional_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    Ok(parse_f64(s))
}

/// The "% Time In Range" column.
///
/// An empty cell counts as 0%, which is what the clinic systems mean by it. Anything else that
/// isn't a number is `None`, so the plan has no usable TTR.
pub fn ttr_percent<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if s.trim().is_empty() {
        return Ok(Some(0.));
    }
    Ok(parse_f64(s))
}

/// The INR value column.
///
/// As with TTR, an empty cell reads as 0, so it counts as a low INR. Text that isn't a number
/// is `None` and never counts.
pub fn inr_value<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if s.trim().is_empty() {
        return Ok(Some(0.));
    }
    Ok(parse_f64(s))
}

/// Like `parse_uk_date`, but for serde. Unparsable dates become `None` rather than an error.
pub fn lenient_uk_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    Ok(parse_uk_date(s))
}

pub fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date in the format used by the clinic exports (dd/mm/yyyy).
///
/// Some exports add a midnight time part (dd/mm/yyyy hh:mm:ss), which we accept and discard.
pub fn parse_uk_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Some(date);
    }
    NaiveDateTime::parse_from_str(s, "%d/%m/%Y %H:%M:%S")
        .map(|dt| dt.date())
        .ok()
}

/// Non-fatal messages raised during a run.
///
/// Each message is logged as it arrives, and kept so the whole lot can be written out as a run
/// log at the end.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        event!(Level::WARN, "{}", message);
        self.messages.push(message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        event!(Level::INFO, "{}", message);
        self.messages.push(message);
    }

    /// Take all messages from `other`, without logging them a second time.
    pub fn append(&mut self, other: &mut Diagnostics) {
        self.messages.append(&mut other.messages);
    }

    pub fn iter(&self) -> slice::Iter<'_, String> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type IntoIter = slice::Iter<'a, String>;
    type Item = &'a String;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

#[cfg(test)]
mod test {
    use super::{parse_f64, parse_uk_date};
    use chrono::NaiveDate;

    #[test]
    fn uk_dates() {
        assert_eq!(
            parse_uk_date("03/02/2017"),
            NaiveDate::from_ymd_opt(2017, 2, 3)
        );
        assert_eq!(
            parse_uk_date(" 03/02/2017 00:00:00"),
            NaiveDate::from_ymd_opt(2017, 2, 3)
        );
        assert_eq!(parse_uk_date("2017-02-03"), None);
        assert_eq!(parse_uk_date("31/02/2017"), None);
        assert_eq!(parse_uk_date(""), None);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_f64(" 2.5"), Some(2.5));
        assert_eq!(parse_f64("NaN"), None);
        assert_eq!(parse_f64("abc"), None);
    }
}
