// libs/appointment-cell/src/services/booking.rs
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    Appointment, AppointmentError, AppointmentFilters, AppointmentStatus, ChangeStatusRequest,
    ClientReportedAt, CreateAppointmentRequest, Paginated, UpdateAppointmentRequest,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, REGISTERED_AT_NOTE_TAG,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::filters::TemporalFilterBuilder;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{AppointmentNotifier, SupabaseNotifier};
use crate::services::scope::{AccessPolicy, CallerIdentity, TenantScope};
use crate::store::{AppointmentQuery, AppointmentStore, SupabaseAppointmentStore};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Entry point for every appointment read and write. Each call derives the
/// caller's [`TenantScope`] once and threads it through storage.
pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    filter_builder: TemporalFilterBuilder,
    policy: AccessPolicy,
    notifier: Option<Arc<dyn AppointmentNotifier>>,
    default_duration_minutes: i32,
    clock: Clock,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig, store: Arc<dyn AppointmentStore>) -> Self {
        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&store)),
            store,
            lifecycle_service: AppointmentLifecycleService::new(),
            filter_builder: TemporalFilterBuilder::from_offset_minutes(config.clinic_utc_offset_minutes),
            policy: AccessPolicy::new(),
            notifier: None,
            default_duration_minutes: config.default_appointment_duration_minutes,
            clock: Arc::new(Utc::now),
        }
    }

    /// Service backed by Supabase, acting with the given caller token.
    pub fn supabase(config: &AppConfig, auth_token: Option<String>) -> Self {
        let store = Arc::new(SupabaseAppointmentStore::new(config, auth_token.clone()));
        let notifier = Arc::new(SupabaseNotifier::new(config, auth_token));
        Self::new(config, store).with_notifier(notifier)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AppointmentNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    #[instrument(skip(self, filters), fields(clinic_id = %caller.clinic_id))]
    pub async fn list_appointments(
        &self,
        caller: &CallerIdentity,
        filters: AppointmentFilters,
    ) -> Result<Paginated<Appointment>, AppointmentError> {
        let scope = TenantScope::for_caller(caller);

        let page = filters.page.unwrap_or(1).max(1);
        let limit = filters.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let mut query = AppointmentQuery::new(&scope).with_doctor(filters.doctor_id);
        query.status = filters.status;
        query.patient_id = filters.patient_id;
        query.reason_contains = filters
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        query.range = self.filter_builder.resolve(
            filters.date.as_deref(),
            filters.week.as_deref(),
            filters.time.as_deref(),
            self.now(),
        );

        let total = self.store.count_appointments(&query).await?;
        let offset = u64::from(page - 1) * u64::from(limit);
        let items = self
            .store
            .find_appointments(&query.paginate(offset, u64::from(limit)))
            .await?;

        let page_count = total.div_ceil(u64::from(limit)) as u32;
        debug!("Listed {} of {} appointments (page {}/{})", items.len(), total, page, page_count);

        Ok(Paginated {
            items,
            total,
            page,
            page_count,
        })
    }

    pub async fn get_appointment(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let scope = TenantScope::for_caller(caller);
        self.fetch_scoped(&scope, appointment_id).await
    }

    async fn fetch_scoped(&self, scope: &TenantScope, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find_appointments(&AppointmentQuery::by_id(scope, appointment_id))
            .await?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound)
    }

    // ==========================================================================
    // WRITES
    // ==========================================================================

    #[instrument(skip(self, request), fields(clinic_id = %caller.clinic_id, doctor_id = %request.doctor_id))]
    pub async fn create_appointment(
        &self,
        caller: &CallerIdentity,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let scope = TenantScope::for_caller(caller);
        self.policy.ensure_can_write_for_doctor(&scope, request.doctor_id)?;
        self.book(&scope, request).await
    }

    /// Booking from a clinic's public page. The clinic is told about the new
    /// appointment; a failed notification does not undo the booking.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub async fn create_public_appointment(
        &self,
        clinic_id: Uuid,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let scope = TenantScope::for_caller(&CallerIdentity::public(clinic_id));
        let appointment = self.book(&scope, request).await?;

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify_new_appointment(&appointment).await {
                warn!("Failed to notify clinic {} of appointment {}: {}", clinic_id, appointment.id, e);
            }
        }

        Ok(appointment)
    }

    async fn book(&self, scope: &TenantScope, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let clinic_id = scope.clinic_id();
        let duration = request.duration.unwrap_or(self.default_duration_minutes);
        validate_duration(duration)?;

        self.ensure_doctor(clinic_id, request.doctor_id).await?;
        self.ensure_patient(clinic_id, request.patient_id).await?;

        let available = self
            .conflict_service
            .is_available(clinic_id, request.doctor_id, request.appointment_date, duration, None)
            .await?;
        if !available {
            return Err(AppointmentError::Conflict);
        }

        let now = self.now();
        let registration = self.resolve_registration(request.registered_at.as_deref(), request.notes, now);

        let appointment = Appointment {
            id: Uuid::new_v4(),
            clinic_id,
            doctor_id: request.doctor_id,
            patient_id: request.patient_id,
            appointment_date: request.appointment_date,
            duration,
            status: AppointmentStatus::Pending,
            reason: request.reason,
            notes: registration.notes,
            amount: None,
            registered_at: registration.registered_at,
            client_reported_at: registration.client_reported_at,
            cancellation_reason: None,
            suggested_new_date: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.store.insert_appointment(appointment).await?;
        info!(
            "Appointment {} booked for doctor {} at {} ({} min)",
            created.id, created.doctor_id, created.appointment_date, created.duration
        );
        Ok(created)
    }

    #[instrument(skip(self, request), fields(clinic_id = %caller.clinic_id))]
    pub async fn update_appointment(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let scope = TenantScope::for_caller(caller);
        let current = self.fetch_scoped(&scope, appointment_id).await?;
        self.lifecycle_service.ensure_mutable(current.status)?;

        let touches_schedule = request.touches_schedule();
        let mut merged = current.clone();

        if let Some(doctor_id) = request.doctor_id {
            self.policy.ensure_can_write_for_doctor(&scope, doctor_id)?;
            if doctor_id != current.doctor_id {
                self.ensure_doctor(scope.clinic_id(), doctor_id).await?;
            }
            merged.doctor_id = doctor_id;
        }
        if let Some(patient_id) = request.patient_id {
            if patient_id != current.patient_id {
                self.ensure_patient(scope.clinic_id(), patient_id).await?;
            }
            merged.patient_id = patient_id;
        }
        if let Some(appointment_date) = request.appointment_date {
            merged.appointment_date = appointment_date;
        }
        if let Some(duration) = request.duration {
            validate_duration(duration)?;
            merged.duration = duration;
        }
        if request.reason.is_some() {
            merged.reason = request.reason;
        }
        if request.notes.is_some() {
            merged.notes = request.notes;
        }

        if touches_schedule {
            let available = self
                .conflict_service
                .is_available(
                    merged.clinic_id,
                    merged.doctor_id,
                    merged.appointment_date,
                    merged.duration,
                    Some(merged.id),
                )
                .await?;
            if !available {
                return Err(AppointmentError::Conflict);
            }
        }

        merged.updated_at = self.now();
        let updated = self.store.update_appointment(merged, current.status).await?;
        info!("Appointment {} updated", updated.id);
        Ok(updated)
    }

    #[instrument(skip(self, request), fields(clinic_id = %caller.clinic_id, requested = %request.status))]
    pub async fn change_status(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
        request: ChangeStatusRequest,
    ) -> Result<Appointment, AppointmentError> {
        let scope = TenantScope::for_caller(caller);
        let current = self.fetch_scoped(&scope, appointment_id).await?;

        self.lifecycle_service
            .validate_status_transition(current.status, request.status)?;
        self.policy.ensure_can_transition(caller, request.status)?;

        let mut updated = current.clone();
        updated.status = request.status;
        match request.status {
            AppointmentStatus::Completed => {
                if let Some(amount) = request.amount {
                    if !amount.is_finite() || amount < 0.0 {
                        return Err(AppointmentError::ValidationError(
                            "Amount must be a non-negative number".to_string(),
                        ));
                    }
                    updated.amount = Some(amount);
                }
            }
            AppointmentStatus::Cancelled => {
                updated.cancellation_reason = request.cancellation_reason;
                updated.suggested_new_date = request.suggested_new_date;
            }
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => {}
        }
        updated.updated_at = self.now();

        let saved = self.store.update_appointment(updated, current.status).await?;
        info!(
            "Appointment {} status changed by {} {}: {} -> {}",
            saved.id, caller.role, caller.user_id, current.status, saved.status
        );
        Ok(saved)
    }

    #[instrument(skip(self), fields(clinic_id = %caller.clinic_id))]
    pub async fn remove_appointment(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
    ) -> Result<(), AppointmentError> {
        let scope = TenantScope::for_caller(caller);
        let existing = self.fetch_scoped(&scope, appointment_id).await?;

        if !self.store.delete_appointment(scope.clinic_id(), existing.id).await? {
            return Err(AppointmentError::NotFound);
        }

        info!("Appointment {} removed by {} {}", existing.id, caller.role, caller.user_id);
        Ok(())
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn ensure_doctor(&self, clinic_id: Uuid, doctor_id: Uuid) -> Result<(), AppointmentError> {
        match self.store.find_doctor(clinic_id, doctor_id).await? {
            Some(doctor) if doctor.is_active => Ok(()),
            Some(_) => {
                warn!("Doctor {} of clinic {} is inactive", doctor_id, clinic_id);
                Err(AppointmentError::DoctorNotFound)
            }
            None => Err(AppointmentError::DoctorNotFound),
        }
    }

    async fn ensure_patient(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<(), AppointmentError> {
        self.store
            .find_patient(clinic_id, patient_id)
            .await?
            .map(|_| ())
            .ok_or(AppointmentError::PatientNotFound)
    }

    /// A parseable client time becomes `registered_at` and is also kept
    /// verbatim in `notes`; anything else falls back to `now`.
    fn resolve_registration(&self, raw: Option<&str>, notes: Option<String>, now: DateTime<Utc>) -> Registration {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Registration {
                registered_at: now,
                client_reported_at: None,
                notes,
            };
        };

        let parsed = self.filter_builder.parse_instant(raw);
        let notes = match parsed {
            Some(_) => Some(append_registration_note(notes, raw)),
            None => {
                warn!("Discarding unparseable registered_at '{}'", raw);
                notes
            }
        };

        Registration {
            registered_at: parsed.unwrap_or(now),
            client_reported_at: Some(ClientReportedAt {
                raw: raw.to_string(),
                parsed,
            }),
            notes,
        }
    }
}

struct Registration {
    registered_at: DateTime<Utc>,
    client_reported_at: Option<ClientReportedAt>,
    notes: Option<String>,
}

fn append_registration_note(notes: Option<String>, raw: &str) -> String {
    let line = format!("{} {}", REGISTERED_AT_NOTE_TAG, raw);
    match notes {
        Some(existing) if !existing.trim().is_empty() => format!("{}\n{}", existing, line),
        _ => line,
    }
}

fn validate_duration(minutes: i32) -> Result<(), AppointmentError> {
    if minutes <= 0 {
        return Err(AppointmentError::ValidationError(format!(
            "Duration must be a positive number of minutes, got {}",
            minutes
        )));
    }
    Ok(())
}
