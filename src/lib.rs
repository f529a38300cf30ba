// Polite web crawler core: per-IP scheduling, per-host sessions, pipelined
// crawl workflows over pluggable behaviors.

pub mod behaviors;
pub mod config;
pub mod core;
pub mod crawler;
pub mod factory;
pub mod network;
pub mod scheduler;
pub mod session;
pub mod trace;
pub mod utils;

// Core types and errors
pub use crate::core::{
    FactoryError, FetchResult, FetchTimings, MISSING_SCHEDULING_INFO, NO_IP_AVAILABLE,
    StageTiming, TraceError,
};

// Configuration
pub use config::{CrawlOptions, CrawlOptionsBuilder, ProcessorFactory, defaults};

// Behaviors
pub use behaviors::processors::{ContentDigest, MetaRefreshSniffer};
pub use behaviors::{Behaviors, DefaultBehaviors, StreamProcessor};

// Politeness state
pub use scheduler::RequestScheduler;
pub use session::{CookieJar, HostSession, PathRules, RobotsRules};

// Object lifetime management
pub use factory::{Destruction, TemporaryFactory};

// Workflow records
pub use trace::{Trace, stages};

// Engine and result assembly
pub use crawler::{
    CrawlEntry, CrawlReport, CrawlSequence, Crawler, JsonSummaryBuilder, ResultBuilder,
};

// Utilities
pub use utils::{canonicalize, epoch_millis, init_logging, init_logging_with, trace_id};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
