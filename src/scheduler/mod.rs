// Per-IP admission: inter-request delay, connection cap, fair host queues

pub mod request_scheduler;

pub use request_scheduler::RequestScheduler;
