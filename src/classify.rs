//! The three clinical risk criteria for a treatment plan.
use crate::InrEvent;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;

/// Thresholds for the risk criteria.
///
/// The defaults are the audit's: 2 INRs over 5 or 1 over 8 in the last 6 months, 1 INR under
/// 1.5 in the last 6 months, and TTR under 65%.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Criteria {
    pub high_inr: f64,
    pub high_inr_count: usize,
    pub very_high_inr: f64,
    pub very_high_inr_count: usize,
    pub low_inr: f64,
    pub low_inr_count: usize,
    pub low_ttr: f64,
    /// Length of the trailing window, ending at the archive horizon.
    pub window_days: f64,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            high_inr: 5.,
            high_inr_count: 2,
            very_high_inr: 8.,
            very_high_inr_count: 1,
            low_inr: 1.5,
            low_inr_count: 1,
            low_ttr: 65.,
            window_days: 365. / 2.,
        }
    }
}

impl Criteria {
    pub fn window(&self) -> Duration {
        Duration::milliseconds((self.window_days * 24. * 60. * 60. * 1000.) as i64)
    }

    /// Whether an event falls in the window ending at `horizon`.
    ///
    /// Events with no valid date are never in the window.
    pub fn in_window(&self, event: &InrEvent, horizon: NaiveDate) -> bool {
        match event.date {
            Some(date) => horizon.signed_duration_since(date) < self.window(),
            None => false,
        }
    }
}

/// The risk flags for one treatment plan.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Classification {
    /// At least 2 INRs over 5, or at least 1 over 8, in the window.
    pub high_inr: bool,
    /// At least 1 INR under 1.5 in the window.
    pub low_inr: bool,
    /// The plan's TTR, carried through for the patient summary.
    pub ttr: Option<f64>,
    /// TTR under 65%.
    pub low_ttr: bool,
}

impl Classification {
    pub fn any(&self) -> bool {
        self.high_inr || self.low_inr || self.low_ttr
    }
}

/// Classify a plan from its INR history and TTR.
///
/// `horizon` is the latest INR date anywhere in the archive, not in this plan.
pub fn classify(
    events: &[InrEvent],
    ttr: Option<f64>,
    horizon: NaiveDate,
    criteria: &Criteria,
) -> Classification {
    let count_in_window = |test: &dyn Fn(f64) -> bool| {
        events
            .iter()
            .filter(|evt| criteria.in_window(evt, horizon))
            .filter(|evt| matches!(evt.value, Some(v) if test(v)))
            .count()
    };

    let high_inr = count_in_window(&|v| v > criteria.high_inr) >= criteria.high_inr_count
        || count_in_window(&|v| v > criteria.very_high_inr) >= criteria.very_high_inr_count;
    let low_inr = count_in_window(&|v| v < criteria.low_inr) >= criteria.low_inr_count;

    Classification {
        high_inr,
        low_inr,
        ttr,
        low_ttr: matches!(ttr, Some(ttr) if ttr < criteria.low_ttr),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn horizon() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 6, 30).unwrap()
    }

    fn event(days_before: i64, value: f64) -> InrEvent {
        InrEvent::new("T1", horizon() - Duration::days(days_before), value)
    }

    fn run(events: &[InrEvent], ttr: Option<f64>) -> Classification {
        classify(events, ttr, horizon(), &Criteria::default())
    }

    #[test]
    fn window_is_half_a_year() {
        let criteria = Criteria::default();
        assert_eq!(criteria.window(), Duration::hours(365 * 12));
        // 182 days is inside, 183 is not (the window is 182.5 days)
        assert!(criteria.in_window(&event(182, 6.), horizon()));
        assert!(!criteria.in_window(&event(183, 6.), horizon()));
        assert!(criteria.in_window(&event(0, 6.), horizon()));
    }

    #[test]
    fn two_high_inrs() {
        assert!(run(&[event(10, 6.0), event(20, 6.2)], Some(80.)).high_inr);
        // exactly 5 isn't high
        assert!(!run(&[event(10, 5.0), event(20, 6.2)], Some(80.)).high_inr);
        assert!(!run(&[event(10, 6.0)], Some(80.)).high_inr);
    }

    #[test]
    fn high_inrs_straddling_window() {
        let events = [
            event(100, 6.0),
            event(182, 5.5),
            event(183, 7.0),
            event(400, 9.0),
        ];
        assert!(run(&events, Some(80.)).high_inr);
        let events = [event(100, 6.0), event(183, 7.0), event(400, 9.0)];
        assert!(!run(&events, Some(80.)).high_inr);
    }

    #[test]
    fn one_very_high_inr() {
        assert!(run(&[event(50, 8.1)], Some(80.)).high_inr);
        assert!(!run(&[event(50, 8.0)], Some(80.)).high_inr);
        assert!(!run(&[event(200, 8.1)], Some(80.)).high_inr);
    }

    #[test]
    fn low_inr() {
        let c = run(&[event(50, 1.4)], Some(80.));
        assert!(c.low_inr);
        assert!(!c.high_inr);
        assert!(!run(&[event(50, 1.5)], Some(80.)).low_inr);
        assert!(!run(&[event(190, 1.0)], Some(80.)).low_inr);
    }

    #[test]
    fn unparsable_events_never_count() {
        let mut no_value = event(10, 9.);
        no_value.value = None;
        let mut no_date = event(10, 9.);
        no_date.date = None;
        let c = run(&[no_value, no_date], Some(80.));
        assert!(!c.high_inr);
        assert!(!c.low_inr);
    }

    #[test]
    fn ttr() {
        let c = run(&[], Some(64.9));
        assert!(c.low_ttr);
        assert_eq!(c.ttr, Some(64.9));
        assert!(c.any());
        assert!(!run(&[], Some(65.)).low_ttr);
        assert!(!run(&[], None).low_ttr);
        assert!(!run(&[], Some(80.)).any());
    }
}
