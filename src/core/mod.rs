//! Session core
//!
//! The message store, the dispatcher that drives send cycles against it, and
//! the gateway that keeps the session on disk.

mod dispatcher;
mod persistence;
mod store;

pub use dispatcher::{ChatDispatcher, ChatError, SendOutcome};
pub use persistence::PersistenceGateway;
pub use store::MessageStore;

#[cfg(test)]
pub(crate) use dispatcher::tests as test_support;
