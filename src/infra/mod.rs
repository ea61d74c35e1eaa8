//! Infrastructure adapters: the document stores behind pools, the ledger
//! and plans.

pub mod store;

pub use store::{DocumentStore, FileStore, InMemoryStore};
