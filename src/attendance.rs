use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

/// Attendance statuses accepted at the recording boundary.
pub const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

pub fn is_valid_status(s: &str) -> bool {
    STATUSES.contains(&s)
}

/// One flattened per-student status from a persisted attendance record.
#[derive(Debug, Clone)]
pub struct AttendanceEntry {
    pub class_id: String,
    pub date: String,
    pub student_id: String,
    pub status: String,
}

/// Composite key used by the calendar-grid renderer.
pub fn lookup_key(class_id: &str, date: &str, student_id: &str) -> String {
    format!("{}_{}_{}", class_id, date, student_id)
}

/// Folds flattened attendance entries into a (class, date, student) -> status
/// map: one O(entries) pass, O(1) point lookups afterwards. If the same key
/// appears twice the later entry wins; the schema's composite primary key
/// keeps that case from arising in practice.
pub fn build_lookup(entries: &[AttendanceEntry]) -> HashMap<String, String> {
    let mut lookup = HashMap::with_capacity(entries.len());
    for e in entries {
        lookup.insert(
            lookup_key(&e.class_id, &e.date, &e.student_id),
            e.status.clone(),
        );
    }
    lookup
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthInfo {
    pub name: &'static str,
    pub index: u32,
    pub days: u32,
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(30)
}

/// Twelve calendar months for the given year, independent of any records.
pub fn month_skeleton(year: i32) -> Vec<MonthInfo> {
    (0..12u32)
        .map(|index| MonthInfo {
            name: MONTH_NAMES[index as usize],
            index,
            days: days_in_month(year, index + 1),
        })
        .collect()
}

pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
