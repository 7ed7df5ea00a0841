// libs/appointment-cell/src/services/scope.rs
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Admin,
    Clinic,
    Doctor,
    Other(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "clinic" => Role::Clinic,
            "doctor" => Role::Doctor,
            other => Role::Other(other.to_string()),
        }
    }

    /// Roles allowed to close an appointment as completed.
    pub fn may_complete(&self) -> bool {
        matches!(self, Role::Admin | Role::Clinic | Role::Doctor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "ADMIN"),
            Role::Clinic => write!(f, "CLINIC"),
            Role::Doctor => write!(f, "DOCTOR"),
            Role::Other(name) => write!(f, "{}", name.to_ascii_uppercase()),
        }
    }
}

/// Who is calling, as established by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub clinic_id: Uuid,
    pub role: Role,
    pub user_id: Uuid,
}

impl CallerIdentity {
    pub fn new(clinic_id: Uuid, role: Role, user_id: Uuid) -> Self {
        Self { clinic_id, role, user_id }
    }

    /// Anonymous caller of a clinic's public booking page.
    pub fn public(clinic_id: Uuid) -> Self {
        Self {
            clinic_id,
            role: Role::Other("public".to_string()),
            user_id: Uuid::nil(),
        }
    }
}

impl TryFrom<&User> for CallerIdentity {
    type Error = AppointmentError;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        let clinic_id = user
            .clinic_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| AppointmentError::Forbidden("User is not attached to a clinic".to_string()))?;

        let user_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppointmentError::Forbidden("User id is not a valid identifier".to_string()))?;

        Ok(Self {
            clinic_id,
            role: Role::parse(user.role_or_default()),
            user_id,
        })
    }
}

/// The `(clinic, doctor?)` constraint every query and write is bound to.
///
/// Fields are private: the only way to obtain a scope is from a caller, so
/// storage never sees an unscoped predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    clinic_id: Uuid,
    doctor_id: Option<Uuid>,
}

impl TenantScope {
    pub fn for_caller(caller: &CallerIdentity) -> Self {
        let doctor_id = match caller.role {
            Role::Doctor => Some(caller.user_id),
            _ => None,
        };

        debug!(
            "Resolved scope for {} {}: clinic {} doctor {:?}",
            caller.role, caller.user_id, caller.clinic_id, doctor_id
        );

        Self {
            clinic_id: caller.clinic_id,
            doctor_id,
        }
    }

    pub fn clinic_id(&self) -> Uuid {
        self.clinic_id
    }

    pub fn doctor_id(&self) -> Option<Uuid> {
        self.doctor_id
    }

    /// Doctor filter to apply: a doctor-bound scope ignores what was requested.
    pub fn effective_doctor(&self, requested: Option<Uuid>) -> Option<Uuid> {
        match (self.doctor_id, requested) {
            (Some(own), Some(other)) if own != other => {
                warn!("Doctor {} requested appointments of doctor {}; using own scope", own, other);
                Some(own)
            }
            (Some(own), _) => Some(own),
            (None, requested) => requested,
        }
    }

    pub fn admits(&self, appointment: &Appointment) -> bool {
        appointment.clinic_id == self.clinic_id
            && self.doctor_id.map_or(true, |own| appointment.doctor_id == own)
    }
}

/// Permission checks consulted by the orchestrator before every mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn new() -> Self {
        Self
    }

    /// A doctor-bound scope may only book or move appointments onto itself.
    pub fn ensure_can_write_for_doctor(
        &self,
        scope: &TenantScope,
        doctor_id: Uuid,
    ) -> Result<(), AppointmentError> {
        match scope.doctor_id() {
            Some(own) if own != doctor_id => {
                warn!("Doctor {} attempted to write an appointment for doctor {}", own, doctor_id);
                Err(AppointmentError::Forbidden(
                    "Doctors can only manage their own appointments".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn ensure_can_transition(
        &self,
        caller: &CallerIdentity,
        requested: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if requested == AppointmentStatus::Completed && !caller.role.may_complete() {
            warn!("Role {} may not complete appointments", caller.role);
            return Err(AppointmentError::Forbidden(format!(
                "Role {} cannot mark appointments as completed",
                caller.role
            )));
        }
        Ok(())
    }
}
