// Default network behaviors: system DNS resolution and the HTTP fetch

pub mod dns;
pub mod fetch;

pub use fetch::build_client;
