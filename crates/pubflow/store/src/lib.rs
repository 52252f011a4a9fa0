//! Durable storage for the publishing pipeline
//!
//! Holds content items, selection groups, live hierarchy rows, reduction
//! tasks and publication requests. Every update is conditional on the
//! record's version, and multi-record writes go through a [`UnitOfWork`].

mod error;
mod memory;
mod postgres;
mod record;
mod traits;
mod unit_of_work;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;
pub use record::Record;
pub use traits::{
    ContentStorage, HierarchyStorage, PublicationStorage, ReductionTaskStorage,
    SelectionGroupStorage, TaskStore,
};
pub use unit_of_work::{Mutation, StoredRecord, UnitOfWork};
