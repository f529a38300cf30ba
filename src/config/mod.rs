// Configuration management module

pub mod options;

pub use options::{CrawlOptions, CrawlOptionsBuilder, ProcessorFactory, defaults};
