// Core vocabulary shared across the crate: error taxonomy and fetch types

pub mod error;
pub mod types;

pub use error::{FactoryError, MISSING_SCHEDULING_INFO, NO_IP_AVAILABLE, TraceError};
pub use types::{FetchResult, FetchTimings, StageTiming};
