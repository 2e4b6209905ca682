//! # saga-coordinator-testing
//!
//! Testing utilities for saga-coordinator with in-memory implementations.
//! Provides [`InMemoryTransactionRepository`], [`InMemoryMessageDispatcher`]
//! and [`CoordinatorHarness`].

pub mod harness;
pub mod memory_dispatcher;
pub mod memory_repository;

pub use harness::{CoordinatorHarness, HarnessBuilder, TestCoordinator, participant, test_config};
pub use memory_dispatcher::{InMemoryDispatcherError, InMemoryMessageDispatcher, SentMessage};
pub use memory_repository::{
    InMemoryRepositoryError, InMemoryTransactionRepository, JournalEntry,
};
