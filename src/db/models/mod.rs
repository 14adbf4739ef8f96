//! Database models, one file per table.
//! Re-exported so callers can `use crate::db::models::*;`.

pub mod appointment;
pub mod appointment_status;
pub mod notification_queue;
pub mod patient;
pub mod service;
pub mod work_shift;

pub use self::appointment::*;
pub use self::appointment_status::*;
pub use self::notification_queue::*;
pub use self::patient::*;
pub use self::service::*;
pub use self::work_shift::*;
