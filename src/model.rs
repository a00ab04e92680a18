use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ACTION_MARKED_PRESENT: &str = "marked_present";

pub const MSG_MARKED: &str = "Student marked present successfully";
pub const MSG_ALREADY_MARKED: &str = "Student already marked present";
pub const MSG_NOT_FOUND: &str = "Student not found";
pub const MSG_STORE_FAILURE: &str = "Failed to update attendance";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttendanceStatus {
    Absent,
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Present => "Present",
        }
    }

    /// Anything other than an exact `Present` cell counts as absent.
    pub fn parse_status(s: &str) -> Self {
        if s.trim() == "Present" {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Absent
        }
    }
}

/// One roster row as held by the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub name: String,
    pub email: String,
    pub roll_number: String,
    pub section: String,
    pub qr_id: String,
    pub attendance: AttendanceStatus,
    /// 1-based sheet row, resolved when the roster is read.
    pub row_index: u32,
}

impl AttendanceRecord {
    pub fn is_present(&self) -> bool {
        self.attendance == AttendanceStatus::Present
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub volunteer_id: String,
    pub volunteer_name: String,
    pub student_id: String,
    pub student_name: String,
    pub timestamp: String,
    pub action: String,
}

impl AuditLogEntry {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.volunteer_id.clone(),
            self.volunteer_name.clone(),
            self.student_id.clone(),
            self.student_name.clone(),
            self.timestamp.clone(),
            self.action.clone(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
        let action = cell(5);
        Self {
            volunteer_id: cell(0),
            volunteer_name: cell(1),
            student_id: cell(2),
            student_name: cell(3),
            timestamp: cell(4),
            action: if action.is_empty() {
                ACTION_MARKED_PRESENT.to_string()
            } else {
                action
            },
        }
    }
}

/// Authenticated person performing scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operator {
    pub id: String,
    pub name: String,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Marked,
    AlreadyMarked,
    NotFound,
    StoreFailure,
}

/// Structured result of a mark call; every path of the marking service resolves to one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<AttendanceRecord>,
    pub status: MarkStatus,
}

impl MarkResult {
    pub fn marked(student: AttendanceRecord) -> Self {
        Self {
            success: true,
            message: MSG_MARKED.to_string(),
            student: Some(student),
            status: MarkStatus::Marked,
        }
    }

    pub fn already_marked(student: AttendanceRecord) -> Self {
        Self {
            success: false,
            message: MSG_ALREADY_MARKED.to_string(),
            student: Some(student),
            status: MarkStatus::AlreadyMarked,
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: false,
            message: MSG_NOT_FOUND.to_string(),
            student: None,
            status: MarkStatus::NotFound,
        }
    }

    pub fn store_failure() -> Self {
        Self {
            success: false,
            message: MSG_STORE_FAILURE.to_string(),
            student: None,
            status: MarkStatus::StoreFailure,
        }
    }

    /// The attendance is recorded in the store, whoever wrote it.
    pub fn is_recorded(&self) -> bool {
        matches!(self.status, MarkStatus::Marked | MarkStatus::AlreadyMarked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_students: u64,
    pub present_students: u64,
    pub absent_students: u64,
    pub attendance_rate: f64,
}

impl AttendanceStats {
    pub fn from_roster(roster: &[AttendanceRecord]) -> Self {
        let total = roster.len() as u64;
        let present = roster.iter().filter(|r| r.is_present()).count() as u64;
        let rate = if total == 0 {
            0.0
        } else {
            ((present as f64 / total as f64) * 10_000.0).round() / 100.0
        };
        Self {
            total_students: total,
            present_students: present,
            absent_students: total - present,
            attendance_rate: rate,
        }
    }
}

/// A scan captured on this device and not yet confirmed by the marking service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAttendance {
    pub id: String,
    pub code: String,
    pub display_name: String,
    pub captured_at: DateTime<Utc>,
    pub synced: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Duplicate,
    Error,
}

/// What the operator sees after a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanOutcome {
    pub kind: OutcomeKind,
    pub message: String,
    pub student: Option<AttendanceRecord>,
}

impl ScanOutcome {
    pub fn success(message: impl Into<String>, student: Option<AttendanceRecord>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: message.into(),
            student,
        }
    }

    pub fn duplicate(message: impl Into<String>, student: Option<AttendanceRecord>) -> Self {
        Self {
            kind: OutcomeKind::Duplicate,
            message: message.into(),
            student,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Error,
            message: message.into(),
            student: None,
        }
    }

    /// Classify a marking response: a failure carrying a snapshot is a duplicate.
    pub fn from_mark(result: MarkResult) -> Self {
        if result.success {
            Self::success(result.message, result.student)
        } else if result.status == MarkStatus::AlreadyMarked || result.student.is_some() {
            Self::duplicate(result.message, result.student)
        } else {
            Self::error(result.message)
        }
    }
}
