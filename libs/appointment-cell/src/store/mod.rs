// libs/appointment-cell/src/store/mod.rs
//
// Persistence seam for the scheduling engine. Writes that place an
// appointment on a doctor's calendar must reject overlaps atomically with the
// write itself; the service-level conflict check is only a fast path.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, DoctorRef, PatientRef};
use crate::services::filters::TimeRange;
use crate::services::scope::TenantScope;

pub use memory::InMemoryAppointmentStore;
pub use supabase::SupabaseAppointmentStore;

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn find_doctor(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Option<DoctorRef>, AppointmentError>;

    async fn find_patient(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientRef>, AppointmentError>;

    /// Rows matching the query, ordered by `appointment_date` ascending.
    async fn find_appointments(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError>;

    /// Rows matching the query, ignoring pagination.
    async fn count_appointments(&self, query: &AppointmentQuery) -> Result<u64, AppointmentError>;

    /// Non-cancelled appointments of a doctor starting before `starts_before`.
    async fn find_active_for_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        starts_before: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Fails with `Conflict` when the row would overlap an active appointment.
    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    /// Writes the row only while its stored status is still `expected_status`.
    ///
    /// Fails with `Conflict` when the row would overlap an active appointment,
    /// `NotFound` when the row is gone, and with [`stale_status_error`] when the
    /// status moved since it was read.
    async fn update_appointment(
        &self,
        appointment: Appointment,
        expected_status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError>;

    /// Returns whether a row was deleted.
    async fn delete_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<bool, AppointmentError>;
}

/// Error for a write whose row changed status underneath it. A row that went
/// terminal stays terminal; any other move is a lost race.
pub fn stale_status_error(actual: AppointmentStatus) -> AppointmentError {
    if actual.is_terminal() {
        AppointmentError::TerminalState(actual)
    } else {
        AppointmentError::Conflict
    }
}

/// Appointment predicate. Only constructible from a [`TenantScope`], and the
/// doctor filter only narrows through the scope.
#[derive(Debug, Clone)]
pub struct AppointmentQuery {
    scope: TenantScope,
    doctor_id: Option<Uuid>,
    pub id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub patient_id: Option<Uuid>,
    pub reason_contains: Option<String>,
    pub range: Option<TimeRange>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl AppointmentQuery {
    pub fn new(scope: &TenantScope) -> Self {
        Self {
            scope: scope.clone(),
            doctor_id: scope.doctor_id(),
            id: None,
            status: None,
            patient_id: None,
            reason_contains: None,
            range: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn by_id(scope: &TenantScope, id: Uuid) -> Self {
        let mut query = Self::new(scope);
        query.id = Some(id);
        query.limit = Some(1);
        query
    }

    pub fn with_doctor(mut self, requested: Option<Uuid>) -> Self {
        self.doctor_id = self.scope.effective_doctor(requested);
        self
    }

    pub fn paginate(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn clinic_id(&self) -> Uuid {
        self.scope.clinic_id()
    }

    pub fn doctor_id(&self) -> Option<Uuid> {
        self.doctor_id
    }

    /// In-process evaluation of the predicate, pagination excluded.
    pub fn matches(&self, appointment: &Appointment) -> bool {
        if !self.scope.admits(appointment) {
            return false;
        }
        if self.doctor_id.is_some_and(|d| d != appointment.doctor_id)
            || self.id.is_some_and(|id| id != appointment.id)
            || self.status.is_some_and(|s| s != appointment.status)
            || self.patient_id.is_some_and(|p| p != appointment.patient_id)
        {
            return false;
        }
        if let Some(needle) = &self.reason_contains {
            let needle = needle.to_lowercase();
            let found = appointment
                .reason
                .as_deref()
                .is_some_and(|reason| reason.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }
        self.range
            .map_or(true, |range| range.contains(appointment.appointment_date))
    }
}
