use serde::Serialize;

/// Per-(mission, student) progress. Progression is monotonic:
/// not-started -> started -> complete, with complete terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionStatus {
    NotStarted,
    Started,
    Complete,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::NotStarted => "not-started",
            MissionStatus::Started => "started",
            MissionStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<MissionStatus> {
        match s {
            "not-started" => Some(MissionStatus::NotStarted),
            "started" => Some(MissionStatus::Started),
            "complete" => Some(MissionStatus::Complete),
            _ => None,
        }
    }
}

/// The explicit transition table. Anything not listed here, including any
/// regression out of `complete`, is disallowed.
pub fn can_transition(from: MissionStatus, to: MissionStatus) -> bool {
    matches!(
        (from, to),
        (MissionStatus::NotStarted, MissionStatus::Started)
            | (MissionStatus::Started, MissionStatus::Complete)
    )
}

/// Emitted exactly once per successful completion; consumed by the points
/// ledger as an atomic balance increment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsAward {
    pub mission_id: String,
    pub student_id: String,
    pub points: i64,
}
