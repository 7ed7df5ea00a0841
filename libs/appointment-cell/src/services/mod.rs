pub mod booking;
pub mod conflict;
pub mod filters;
pub mod lifecycle;
pub mod notification;
pub mod scope;
