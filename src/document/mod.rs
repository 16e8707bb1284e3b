//! Document State Store

mod store;

pub use store::{DocumentSnapshot, DocumentStore};
