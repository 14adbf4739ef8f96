pub mod appointment;
pub mod notification_queue_repository;
pub mod patient;
pub mod service;
pub mod work_shift;

pub use appointment::AppointmentRepository;
pub use notification_queue_repository::NotificationQueueRepository;
pub use patient::PatientRepository;
pub use service::ServiceRepository;
pub use work_shift::WorkShiftRepository;
