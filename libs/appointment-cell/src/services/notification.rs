// libs/appointment-cell/src/services/notification.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_database::supabase::{return_representation, SupabaseClient};

use crate::models::{Appointment, AppointmentError};

/// Tells clinic staff about bookings they did not make themselves.
#[async_trait]
pub trait AppointmentNotifier: Send + Sync {
    async fn notify_new_appointment(&self, appointment: &Appointment) -> Result<(), AppointmentError>;
}

/// Writes a row into the clinic's `notifications` table.
pub struct SupabaseNotifier {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl SupabaseNotifier {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            auth_token,
        }
    }
}

#[async_trait]
impl AppointmentNotifier for SupabaseNotifier {
    async fn notify_new_appointment(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let body = json!({
            "clinic_id": appointment.clinic_id,
            "type": "new_appointment",
            "appointment_id": appointment.id,
            "doctor_id": appointment.doctor_id,
            "patient_id": appointment.patient_id,
            "appointment_date": appointment.appointment_date,
            "is_read": false,
            "created_at": Utc::now(),
        });

        debug!("Notifying clinic {} of appointment {}", appointment.clinic_id, appointment.id);

        let _: Value = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                self.auth_token.as_deref(),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to create notification: {}", e)))?;

        Ok(())
    }
}
