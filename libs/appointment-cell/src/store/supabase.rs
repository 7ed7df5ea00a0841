// libs/appointment-cell/src/store/supabase.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{return_representation, SupabaseApiError, SupabaseClient};

use crate::models::{Appointment, AppointmentError, AppointmentStatus, DoctorRef, PatientRef};
use crate::store::{stale_status_error, AppointmentQuery, AppointmentStore};

/// Postgres SQLSTATE raised by the appointments exclusion constraint.
const EXCLUSION_VIOLATION: &str = "23P01";

/// PostgREST-backed store. Overlap rejection on write is enforced by the
/// `appointments_no_overlap` exclusion constraint (see `migrations/`).
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            auth_token,
        }
    }

    fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    async fn fetch_rows<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AppointmentError> {
        self.supabase
            .request(Method::GET, path, self.token(), None)
            .await
            .map_err(map_database_error)
    }

    async fn write_rows(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<Appointment>, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(method, path, self.token(), body, Some(return_representation()))
            .await
            .map_err(map_database_error)?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))
                })
            })
            .collect()
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find_doctor(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<Option<DoctorRef>, AppointmentError> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&clinic_id=eq.{}&select=id,clinic_id,is_active",
            doctor_id, clinic_id
        );
        let rows: Vec<DoctorRef> = self.fetch_rows(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_patient(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientRef>, AppointmentError> {
        let path = format!(
            "/rest/v1/patients?id=eq.{}&clinic_id=eq.{}&select=id,clinic_id",
            patient_id, clinic_id
        );
        let rows: Vec<PatientRef> = self.fetch_rows(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_appointments(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = format!("/rest/v1/appointments?{}&order=appointment_date.asc", query_filters(query).join("&"));
        if query.offset > 0 {
            path.push_str(&format!("&offset={}", query.offset));
        }
        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }

        debug!("Fetching appointments: {}", path);
        self.fetch_rows(&path).await
    }

    async fn count_appointments(&self, query: &AppointmentQuery) -> Result<u64, AppointmentError> {
        let path = format!("/rest/v1/appointments?{}", query_filters(query).join("&"));
        self.supabase
            .count(&path, self.token())
            .await
            .map_err(map_database_error)
    }

    async fn find_active_for_doctor(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        starts_before: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?clinic_id=eq.{}&doctor_id=eq.{}&status=neq.cancelled&appointment_date=lt.{}",
            clinic_id,
            doctor_id,
            timestamp(starts_before)
        );
        if let Some(excluded) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", excluded));
        }
        self.fetch_rows(&path).await
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let body = appointment_row(&appointment)?;
        self.write_rows(Method::POST, "/rest/v1/appointments", Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Insert returned no rows".to_string()))
    }

    async fn update_appointment(
        &self,
        appointment: Appointment,
        expected_status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        let row_path = format!(
            "/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}",
            appointment.id, appointment.clinic_id
        );
        let path = format!("{}&status=eq.{}", row_path, expected_status);
        let body = appointment_row(&appointment)?;

        if let Some(updated) = self.write_rows(Method::PATCH, &path, Some(body)).await?.into_iter().next() {
            return Ok(updated);
        }

        // Nothing matched: the row is gone or its status moved since it was read
        let current: Vec<Appointment> = self.fetch_rows(&row_path).await?;
        match current.into_iter().next() {
            Some(row) => {
                warn!(
                    "Write of appointment {} rejected: status is {}, expected {}",
                    row.id, row.status, expected_status
                );
                Err(stale_status_error(row.status))
            }
            None => Err(AppointmentError::NotFound),
        }
    }

    async fn delete_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&clinic_id=eq.{}", appointment_id, clinic_id);
        let deleted = self.write_rows(Method::DELETE, &path, None).await?;
        Ok(!deleted.is_empty())
    }
}

/// PostgREST filters for everything in the query except pagination.
fn query_filters(query: &AppointmentQuery) -> Vec<String> {
    let mut filters = vec![format!("clinic_id=eq.{}", query.clinic_id())];

    if let Some(doctor_id) = query.doctor_id() {
        filters.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(id) = query.id {
        filters.push(format!("id=eq.{}", id));
    }
    if let Some(status) = query.status {
        filters.push(format!("status=eq.{}", status));
    }
    if let Some(patient_id) = query.patient_id {
        filters.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(reason) = &query.reason_contains {
        filters.push(format!("reason=ilike.*{}*", urlencoding::encode(reason)));
    }
    if let Some(range) = query.range {
        filters.push(format!("appointment_date=gte.{}", timestamp(range.start)));
        filters.push(format!("appointment_date=lte.{}", timestamp(range.end)));
    }

    filters
}

/// `Z`-suffixed so the value needs no escaping inside a query string.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Row body with the derived `ends_at` column the exclusion constraint ranges over.
/// Both ends are written at the same precision so the `ends_at` CHECK holds.
fn appointment_row(appointment: &Appointment) -> Result<Value, AppointmentError> {
    let mut row = serde_json::to_value(appointment)
        .map_err(|e| AppointmentError::DatabaseError(format!("Failed to serialize appointment: {}", e)))?;

    if let Value::Object(fields) = &mut row {
        fields.insert(
            "appointment_date".to_string(),
            Value::String(timestamp(appointment.appointment_date)),
        );
        fields.insert("ends_at".to_string(), Value::String(timestamp(appointment.end_time())));
    }
    Ok(row)
}

fn map_database_error(err: anyhow::Error) -> AppointmentError {
    if let Some(api_error) = err.downcast_ref::<SupabaseApiError>() {
        if api_error.is_conflict() || api_error.sql_state().as_deref() == Some(EXCLUSION_VIOLATION) {
            warn!("Write rejected by overlap constraint: {}", api_error.body);
            return AppointmentError::Conflict;
        }
    }
    error!("Appointment store error: {}", err);
    AppointmentError::DatabaseError(err.to_string())
}
