//! Ports for infrastructure adapters.
//!
//! The coordinator core never talks to a database or a message bus directly.
//! Backends implement [`TransactionRepository`] and [`MessageDispatcher`].

pub mod dispatcher;
pub mod repository;

pub use dispatcher::MessageDispatcher;
pub use repository::TransactionRepository;
