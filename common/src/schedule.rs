// Schedule selection module
//
// Decides which email rules are due for the current instant and which
// subscribers are eligible to receive them.

use crate::models::{EmailRule, Mode, Periodicity, Subscriber, TimingWindow};
use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;
use tracing::info;

/// Calendar facts a rule is matched against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMoment {
    /// Label of the last timing window containing the current hour
    pub timing: Option<String>,
    /// ISO weekday number, Monday = 1
    pub weekday: u32,
    pub day_of_month: u32,
}

impl RunMoment {
    pub fn at(now: &DateTime<Tz>, windows: &[TimingWindow]) -> Self {
        Self {
            timing: resolve_timing(windows, now.hour()).map(str::to_string),
            weekday: now.weekday().number_from_monday(),
            day_of_month: now.day(),
        }
    }
}

/// Resolve the timing label for an hour
///
/// Every window is scanned and the last one containing the hour wins,
/// so later table entries override earlier ones where they overlap.
pub fn resolve_timing(windows: &[TimingWindow], hour: u32) -> Option<&str> {
    windows
        .iter()
        .filter(|window| window.contains(hour))
        .last()
        .map(|window| window.label.as_str())
}

/// Whether a rule's periodicity fires on the given moment (timing aside)
fn periodicity_matches(rule: &EmailRule, moment: &RunMoment) -> bool {
    let spec = rule.periodicity_specification.as_deref();
    match rule.periodicity {
        Periodicity::Daily => true,
        Periodicity::Weekly => spec == Some(moment.weekday.to_string().as_str()),
        Periodicity::Monthly => spec == Some(moment.day_of_month.to_string().as_str()),
        Periodicity::Run | Periodicity::Other(_) => false,
    }
}

/// Select rules due at `moment`, preserving table order
pub fn select_due<'a>(rules: &'a [EmailRule], moment: &RunMoment) -> Vec<&'a EmailRule> {
    let Some(timing) = moment.timing.as_deref() else {
        return Vec::new();
    };

    rules
        .iter()
        .filter(|rule| rule.mode != Mode::Deprecated)
        .filter(|rule| rule.timing.as_deref() == Some(timing))
        .filter(|rule| periodicity_matches(rule, moment))
        .collect()
}

/// Select the single rule named by an override id, ignoring timing entirely
pub fn select_override<'a>(rules: &'a [EmailRule], email_id: &str) -> Vec<&'a EmailRule> {
    rules
        .iter()
        .filter(|rule| rule.mode != Mode::Deprecated)
        .filter(|rule| rule.periodicity == Periodicity::Run)
        .filter(|rule| rule.email_id == email_id)
        .collect()
}

/// Build the due set for this run
pub fn due_rules<'a>(
    rules: &'a [EmailRule],
    now: &DateTime<Tz>,
    windows: &[TimingWindow],
    override_email_id: Option<&str>,
) -> Vec<&'a EmailRule> {
    if let Some(email_id) = override_email_id {
        let due = select_override(rules, email_id);
        info!(email_id, due = due.len(), "Running only specific email");
        return due;
    }

    let moment = RunMoment::at(now, windows);
    let due = select_due(rules, &moment);
    info!(
        timing = moment.timing.as_deref().unwrap_or(""),
        weekly = moment.weekday,
        monthly = moment.day_of_month,
        due = due.len(),
        "Selected due emails"
    );
    due
}

/// Keep subscribers that are not disabled
pub fn active_subscribers(subscribers: &[Subscriber]) -> Vec<&Subscriber> {
    subscribers.iter().filter(|s| s.active()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rule(id: &str, mode: &str, periodicity: &str, spec: &str, timing: &str) -> EmailRule {
        EmailRule {
            email_id: id.to_string(),
            mode: Mode::from(mode.to_string()),
            periodicity: Periodicity::from(periodicity.to_string()),
            periodicity_specification: (!spec.is_empty()).then(|| spec.to_string()),
            timing: (!timing.is_empty()).then(|| timing.to_string()),
            group_id: "g".to_string(),
            owner: "owner@x.com".to_string(),
            subject: String::new(),
            message: String::new(),
            merge_attachments: false,
        }
    }

    fn windows() -> Vec<TimingWindow> {
        vec![
            TimingWindow::new("morning", 6, 12),
            TimingWindow::new("afternoon", 12, 18),
            TimingWindow::new("night", 22, 6),
        ]
    }

    fn ids(rules: Vec<&EmailRule>) -> Vec<&str> {
        rules.into_iter().map(|r| r.email_id.as_str()).collect()
    }

    #[test]
    fn test_overlapping_windows_last_wins() {
        let windows = vec![
            TimingWindow::new("early", 5, 10),
            TimingWindow::new("late", 8, 12),
        ];
        assert_eq!(resolve_timing(&windows, 7), Some("early"));
        assert_eq!(resolve_timing(&windows, 9), Some("late"));
        assert_eq!(resolve_timing(&windows, 13), None);
    }

    #[test]
    fn test_run_moment_in_prague() {
        // 2024-03-04 was a Monday; 07:30 UTC is 08:30 in Prague
        let now = chrono_tz::Europe::Prague
            .from_utc_datetime(
                &chrono::NaiveDate::from_ymd_opt(2024, 3, 4)
                    .unwrap()
                    .and_hms_opt(7, 30, 0)
                    .unwrap(),
            );
        let moment = RunMoment::at(&now, &windows());
        assert_eq!(moment.timing.as_deref(), Some("morning"));
        assert_eq!(moment.weekday, 1);
        assert_eq!(moment.day_of_month, 4);
    }

    #[test]
    fn test_select_due_filters_and_keeps_order() {
        let rules = vec![
            rule("1", "run", "daily", "", "morning"),
            rule("2", "run", "weekly", "1", "morning"),
            rule("3", "run", "weekly", "0", "morning"),
            rule("4", "run", "monthly", "4", "morning"),
            rule("5", "deprecated", "daily", "", "morning"),
            rule("6", "test", "daily", "", "afternoon"),
            rule("7", "run", "run", "", "morning"),
            rule("8", "send me a copy", "daily", "", "morning"),
        ];
        let moment = RunMoment {
            timing: Some("morning".to_string()),
            weekday: 1,
            day_of_month: 4,
        };

        assert_eq!(ids(select_due(&rules, &moment)), vec!["1", "2", "4", "8"]);
    }

    #[test]
    fn test_weekly_requires_iso_weekday() {
        let rules = vec![
            rule("sun-as-0", "run", "weekly", "0", "morning"),
            rule("sun-as-7", "run", "weekly", "7", "morning"),
        ];
        let sunday = RunMoment {
            timing: Some("morning".to_string()),
            weekday: 7,
            day_of_month: 10,
        };
        assert_eq!(ids(select_due(&rules, &sunday)), vec!["sun-as-7"]);
    }

    #[test]
    fn test_no_timing_selects_nothing() {
        let rules = vec![rule("1", "run", "daily", "", "morning")];
        let moment = RunMoment {
            timing: None,
            weekday: 1,
            day_of_month: 1,
        };
        assert!(select_due(&rules, &moment).is_empty());
    }

    #[test]
    fn test_override_ignores_timing() {
        let rules = vec![
            rule("9", "run", "run", "", "never"),
            rule("9", "deprecated", "run", "", ""),
            rule("9", "run", "daily", "", "morning"),
            rule("10", "run", "run", "", ""),
        ];
        let now = chrono_tz::Europe::Prague
            .with_ymd_and_hms(2024, 3, 4, 15, 0, 0)
            .unwrap();
        let due = due_rules(&rules, &now, &windows(), Some("9"));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].timing.as_deref(), Some("never"));
    }

    #[test]
    fn test_active_subscribers() {
        let subscribers = vec![
            Subscriber {
                group_id: "g".to_string(),
                email: "a@x.com".to_string(),
                ..Subscriber::default()
            },
            Subscriber {
                group_id: "g".to_string(),
                email: "b@x.com".to_string(),
                is_active: Some("disabled".to_string()),
                ..Subscriber::default()
            },
        ];
        let active = active_subscribers(&subscribers);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].email, "a@x.com");
    }
}
