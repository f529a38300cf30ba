// Per-host crawl state: politeness, counters, cookies, robots allowance

pub mod cookies;
pub mod host;
pub mod rules;

pub use cookies::CookieJar;
pub use host::{HostSession, RobotsRules};
pub use rules::PathRules;
