// The crawl workflow engine and its result assembly

pub mod builder;
pub mod engine;

pub use builder::{CrawlEntry, CrawlReport, CrawlSequence, JsonSummaryBuilder, ResultBuilder};
pub use engine::Crawler;
