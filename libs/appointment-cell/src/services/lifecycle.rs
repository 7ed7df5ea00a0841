// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

impl AppointmentStatus {
    /// Statuses reachable in one step. Adding a variant forces this match
    /// to be revisited.
    pub fn allowed_transitions(self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Pending => &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled],
            AppointmentStatus::Confirmed => &[AppointmentStatus::Completed, AppointmentStatus::Cancelled],
            AppointmentStatus::Completed => &[],
            AppointmentStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, requested: AppointmentStatus) -> bool {
        self.allowed_transitions().contains(&requested)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Active appointments occupy their doctor's time slot.
    pub fn is_active(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !current_status.can_transition_to(new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                allowed: current_status.allowed_transitions().to_vec(),
            });
        }

        Ok(())
    }

    /// Field edits are refused once the appointment reached a terminal state.
    pub fn ensure_mutable(&self, current_status: AppointmentStatus) -> Result<(), AppointmentError> {
        if current_status.is_terminal() {
            warn!("Refusing to modify {} appointment", current_status);
            return Err(AppointmentError::TerminalState(current_status));
        }
        Ok(())
    }
}
