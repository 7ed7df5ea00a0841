use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError};
use crate::store::AppointmentStore;

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`.
/// Touching endpoints do not overlap.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// First active appointment in `existing` overlapping the candidate interval.
pub fn first_conflict<'a, I>(
    existing: I,
    candidate_start: DateTime<Utc>,
    candidate_end: DateTime<Utc>,
) -> Option<&'a Appointment>
where
    I: IntoIterator<Item = &'a Appointment>,
{
    existing.into_iter().find(|appointment| {
        appointment.is_active()
            && intervals_overlap(
                candidate_start,
                candidate_end,
                appointment.appointment_date,
                appointment.end_time(),
            )
    })
}

pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Whether the doctor is free for `[candidate_start, candidate_start + duration)`.
    #[instrument(skip(self))]
    pub async fn is_available(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        candidate_start: DateTime<Utc>,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        let candidate_end = candidate_start + Duration::minutes(duration_minutes as i64);

        // Anything starting at or after candidate_end cannot overlap
        let existing = self
            .store
            .find_active_for_doctor(clinic_id, doctor_id, candidate_end, exclude_appointment_id)
            .await?;

        match first_conflict(&existing, candidate_start, candidate_end) {
            Some(blocking) => {
                warn!(
                    "Doctor {} busy: appointment {} covers {} - {}",
                    doctor_id,
                    blocking.id,
                    blocking.appointment_date,
                    blocking.end_time()
                );
                Ok(false)
            }
            None => {
                debug!("Doctor {} free among {} existing appointments", doctor_id, existing.len());
                Ok(true)
            }
        }
    }
}
