use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "LATE" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordRow {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub display_name: String,
    pub class_id: String,
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAbsences {
    pub class_id: String,
    pub class_name: String,
    pub unique_absences: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceAlert {
    pub student_id: String,
    pub display_name: String,
    pub class_name: String,
    pub streak: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub unique_absence_days: usize,
    pub unique_late_days: usize,
    pub attendance_rate: String,
    pub class_ranking: Vec<ClassAbsences>,
    pub alerts: Vec<AbsenceAlert>,
}

#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    pub alert_threshold: usize,
    pub ranking_size: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        SummaryOptions {
            alert_threshold: 3,
            ranking_size: 3,
        }
    }
}

/// A student is absent (or late) for a calendar day at most once, no matter
/// how many of that day's sessions carry the status.
pub fn unique_status_days(records: &[RecordRow], status: AttendanceStatus) -> usize {
    records
        .iter()
        .filter(|r| r.status == status)
        .map(|r| (r.student_id.as_str(), r.date))
        .collect::<HashSet<_>>()
        .len()
}

/// Percentage of non-absent student-days over possible student-days, where
/// possible = students x distinct record dates. One decimal place; an empty
/// record set reads as full attendance.
pub fn attendance_rate(records: &[RecordRow], student_count: usize) -> String {
    if records.is_empty() {
        return "100".to_string();
    }
    let unique_dates = records
        .iter()
        .map(|r| r.date)
        .collect::<HashSet<_>>()
        .len()
        .max(1);
    let possible = student_count * unique_dates;
    if possible == 0 {
        return "100".to_string();
    }
    let unique_absences = unique_status_days(records, AttendanceStatus::Absent);
    let rate = 100.0 - (unique_absences as f64 / possible as f64) * 100.0;
    format!("{:.1}", rate)
}

pub fn class_absence_ranking(
    records: &[RecordRow],
    students: &[StudentRow],
    classes: &[ClassRow],
    top_n: usize,
) -> Vec<ClassAbsences> {
    let class_by_student: HashMap<&str, &str> = students
        .iter()
        .map(|s| (s.id.as_str(), s.class_id.as_str()))
        .collect();

    let mut pairs_by_class: HashMap<&str, HashSet<(&str, NaiveDate)>> = HashMap::new();
    for r in records.iter().filter(|r| r.status == AttendanceStatus::Absent) {
        let Some(class_id) = class_by_student.get(r.student_id.as_str()) else {
            continue;
        };
        pairs_by_class
            .entry(class_id)
            .or_default()
            .insert((r.student_id.as_str(), r.date));
    }

    let mut ranking: Vec<ClassAbsences> = classes
        .iter()
        .map(|c| ClassAbsences {
            class_id: c.id.clone(),
            class_name: c.name.clone(),
            unique_absences: pairs_by_class
                .get(c.id.as_str())
                .map(|set| set.len())
                .unwrap_or(0),
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.unique_absences
            .cmp(&a.unique_absences)
            .then_with(|| a.class_name.cmp(&b.class_name))
    });
    ranking.truncate(top_n);
    ranking
}

/// Walk a student's distinct record dates most-recent-first. A date with any
/// PRESENT or LATE record stops the walk; a date whose records are
/// absence-only extends the streak.
fn streak_for_student(dates: &HashMap<NaiveDate, DayFlags>) -> usize {
    let mut ordered: Vec<&NaiveDate> = dates.keys().collect();
    ordered.sort_unstable_by(|a, b| b.cmp(a));

    let mut streak = 0usize;
    for date in ordered {
        let flags = &dates[date];
        if flags.present_or_late {
            break;
        }
        if flags.absent {
            streak += 1;
        }
    }
    streak
}

#[derive(Debug, Default)]
struct DayFlags {
    absent: bool,
    present_or_late: bool,
}

pub fn consecutive_absence_alerts(
    records: &[RecordRow],
    students: &[StudentRow],
    classes: &[ClassRow],
    threshold: usize,
) -> Vec<AbsenceAlert> {
    let class_names: HashMap<&str, &str> = classes
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();

    let mut days_by_student: HashMap<&str, HashMap<NaiveDate, DayFlags>> = HashMap::new();
    for r in records {
        let flags = days_by_student
            .entry(r.student_id.as_str())
            .or_default()
            .entry(r.date)
            .or_default();
        match r.status {
            AttendanceStatus::Absent => flags.absent = true,
            AttendanceStatus::Present | AttendanceStatus::Late => flags.present_or_late = true,
        }
    }

    let mut alerts: Vec<AbsenceAlert> = students
        .iter()
        .filter_map(|s| {
            let dates = days_by_student.get(s.id.as_str())?;
            let streak = streak_for_student(dates);
            if streak < threshold.max(1) {
                return None;
            }
            Some(AbsenceAlert {
                student_id: s.id.clone(),
                display_name: s.display_name.clone(),
                class_name: class_names
                    .get(s.class_id.as_str())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                streak,
            })
        })
        .collect();
    alerts.sort_by(|a, b| {
        b.streak
            .cmp(&a.streak)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    alerts
}

pub fn summarize(
    records: &[RecordRow],
    students: &[StudentRow],
    classes: &[ClassRow],
    opts: SummaryOptions,
) -> DashboardSummary {
    DashboardSummary {
        unique_absence_days: unique_status_days(records, AttendanceStatus::Absent),
        unique_late_days: unique_status_days(records, AttendanceStatus::Late),
        attendance_rate: attendance_rate(records, students.len()),
        class_ranking: class_absence_ranking(records, students, classes, opts.ranking_size),
        alerts: consecutive_absence_alerts(records, students, classes, opts.alert_threshold),
    }
}
