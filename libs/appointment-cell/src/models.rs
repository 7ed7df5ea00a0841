// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    /// Length in minutes.
    pub duration: i32,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub amount: Option<f64>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub client_reported_at: Option<ClientReportedAt>,
    pub cancellation_reason: Option<String>,
    pub suggested_new_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Exclusive end of the booked interval.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.appointment_date + Duration::minutes(self.duration as i64)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    #[serde(alias = "PENDING")]
    Pending,
    #[serde(alias = "CONFIRMED")]
    Confirmed,
    #[serde(alias = "COMPLETED")]
    Completed,
    #[serde(alias = "CANCELLED")]
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Registration time exactly as the client sent it, next to what the
/// server could make of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientReportedAt {
    pub raw: String,
    pub parsed: Option<DateTime<Utc>>,
}

/// Tag prefixed to the raw client registration time when it is copied into `notes`.
pub const REGISTERED_AT_NOTE_TAG: &str = "REGISTERED_AT_ORIGINAL:";

// ==============================================================================
// TENANT-SCOPED REFERENCES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorRef {
    pub id: Uuid,
    pub clinic_id: Uuid,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRef {
    pub id: Uuid,
    pub clinic_id: Uuid,
}

fn default_true() -> bool {
    true
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration: Option<i32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Client wall-clock time of form submission, untrusted.
    pub registered_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub appointment_date: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl UpdateAppointmentRequest {
    /// Whether the patch moves the appointment in time or to another doctor.
    pub fn touches_schedule(&self) -> bool {
        self.doctor_id.is_some() || self.appointment_date.is_some() || self.duration.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: AppointmentStatus,
    pub amount: Option<f64>,
    pub cancellation_reason: Option<String>,
    pub suggested_new_date: Option<DateTime<Utc>>,
}

impl ChangeStatusRequest {
    pub fn to(status: AppointmentStatus) -> Self {
        Self {
            status,
            amount: None,
            cancellation_reason: None,
            suggested_new_date: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilters {
    pub status: Option<AppointmentStatus>,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub reason: Option<String>,
    /// Calendar day, `YYYY-MM-DD` or RFC 3339.
    pub date: Option<String>,
    /// `YYYY-Www` or any date inside the week.
    pub week: Option<String>,
    /// `HH` or `HH:MM`.
    pub time: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_count: u32,
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Appointment conflicts with an existing booking for this doctor")]
    Conflict,

    #[error("Appointment is {0} and can no longer be modified")]
    TerminalState(AppointmentStatus),

    #[error("Cannot change status from {from} (allowed: {})", display_statuses(.allowed))]
    InvalidTransition {
        from: AppointmentStatus,
        allowed: Vec<AppointmentStatus>,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

fn display_statuses(statuses: &[AppointmentStatus]) -> String {
    if statuses.is_empty() {
        return "none".to_string();
    }
    statuses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
