// libs/appointment-cell/src/store/memory.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, DoctorRef, PatientRef};
use crate::services::conflict::first_conflict;
use crate::store::{stale_status_error, AppointmentQuery, AppointmentStore};

/// Process-local store. Every write re-runs the overlap check while holding
/// the appointments write lock, so check and write are one step.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    doctors: RwLock<HashMap<Uuid, DoctorRef>>,
    patients: RwLock<HashMap<Uuid, PatientRef>>,
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_doctor(&self, doctor: DoctorRef) {
        self.doctors.write().await.insert(doctor.id, doctor);
    }

    pub async fn add_patient(&self, patient: PatientRef) {
        self.patients.write().await.insert(patient.id, patient);
    }

    pub async fn set_doctor_active(&self, doctor_id: Uuid, is_active: bool) {
        if let Some(doctor) = self.doctors.write().await.get_mut(&doctor_id) {
            doctor.is_active = is_active;
        }
    }

    /// Every stored appointment regardless of tenant, ordered by start.
    pub async fn snapshot(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self.appointments.read().await.values().cloned().collect();
        all.sort_by_key(|a| (a.appointment_date, a.id));
        all
    }

    fn ensure_slot_free(
        rows: &HashMap<Uuid, Appointment>,
        candidate: &Appointment,
    ) -> Result<(), AppointmentError> {
        if !candidate.is_active() {
            return Ok(());
        }

        let same_doctor = rows.values().filter(|existing| {
            existing.id != candidate.id
                && existing.clinic_id == candidate.clinic_id
                && existing.doctor_id == candidate.doctor_id
        });

        if let Some(blocking) = first_conflict(same_doctor, candidate.appointment_date, candidate.end_time()) {
            warn!(
                "Write of appointment {} rejected: overlaps appointment {}",
                candidate.id, blocking.id
            );
            return Err(AppointmentError::Conflict);
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_doctor(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Option<DoctorRef>, AppointmentError> {
        Ok(self
            .doctors
            .read()
            .await
            .get(&doctor_id)
            .filter(|doctor| doctor.clinic_id == clinic_id)
            .cloned())
    }

    async fn find_patient(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientRef>, AppointmentError> {
        Ok(self
            .patients
            .read()
            .await
            .get(&patient_id)
            .filter(|patient| patient.clinic_id == clinic_id)
            .cloned())
    }

    async fn find_appointments(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.appointments.read().await;
        let mut matching: Vec<Appointment> = rows.values().filter(|a| query.matches(a)).cloned().collect();
        matching.sort_by_key(|a| (a.appointment_date, a.id));

        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect())
    }

    async fn count_appointments(&self, query: &AppointmentQuery) -> Result<u64, AppointmentError> {
        let rows = self.appointments.read().await;
        Ok(rows.values().filter(|a| query.matches(a)).count() as u64)
    }

    async fn find_active_for_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        starts_before: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let rows = self.appointments.read().await;
        Ok(rows
            .values()
            .filter(|a| {
                a.clinic_id == clinic_id
                    && a.doctor_id == doctor_id
                    && a.is_active()
                    && a.appointment_date < starts_before
                    && Some(a.id) != exclude_appointment_id
            })
            .cloned()
            .collect())
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut rows = self.appointments.write().await;
        if rows.contains_key(&appointment.id) {
            return Err(AppointmentError::DatabaseError(format!(
                "Appointment {} already exists",
                appointment.id
            )));
        }
        Self::ensure_slot_free(&rows, &appointment)?;

        debug!("Storing appointment {}", appointment.id);
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update_appointment(
        &self,
        appointment: Appointment,
        expected_status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let mut rows = self.appointments.write().await;
        match rows.get(&appointment.id) {
            Some(existing) if existing.clinic_id == appointment.clinic_id => {
                if existing.status != expected_status {
                    warn!(
                        "Write of appointment {} rejected: status is {}, expected {}",
                        appointment.id, existing.status, expected_status
                    );
                    return Err(stale_status_error(existing.status));
                }
            }
            _ => return Err(AppointmentError::NotFound),
        }
        Self::ensure_slot_free(&rows, &appointment)?;

        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn delete_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        let mut rows = self.appointments.write().await;
        match rows.get(&appointment_id) {
            Some(existing) if existing.clinic_id == clinic_id => {
                rows.remove(&appointment_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
