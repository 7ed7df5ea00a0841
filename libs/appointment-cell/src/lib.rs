pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use models::*;
pub use services::booking::AppointmentBookingService;
pub use services::scope::{AccessPolicy, CallerIdentity, Role, TenantScope};
pub use store::{AppointmentQuery, AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
