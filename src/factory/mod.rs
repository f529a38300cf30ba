// Keyed cache of async-built objects with delayed eviction

pub mod temporary;

pub use temporary::{DestroyAction, Destruction, TemporaryFactory};
