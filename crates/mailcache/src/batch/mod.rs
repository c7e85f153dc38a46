//! Staged bulk mutations

mod manager;

pub use manager::BatchOperationManager;
