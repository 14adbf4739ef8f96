pub mod availability;
pub mod booking;
pub mod google_auth;
pub mod google_calendar;
pub mod http;
pub mod init;
pub mod notifications;
pub mod stats;
