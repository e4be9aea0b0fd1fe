#![forbid(unsafe_code)]

//! Core domain model and business logic for clinic treatment tracking.
//!
//! This crate provides:
//! - Domain types (treatments, entries, treatment types, users)
//! - The treatment lifecycle engine (assessment, costing, payment)
//! - Persistence (CSV collections with atomic multi-file commits)
//! - Configuration and logging

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
mod rows;
pub mod snapshot;
pub mod store;
pub mod catalog;
pub mod users;
pub mod engine;

// Re-export commonly used types
pub use error::{EntityKind, Error, ErrorKind, Result};
pub use types::*;
pub use config::Config;
pub use store::{CsvTreatmentStore, MemoryTreatmentStore, TreatmentStore};
pub use catalog::{CsvTreatmentTypeCatalog, MemoryCatalog, TreatmentTypeCatalog};
pub use users::{ClinicianLookup, PatientLookup, Role, User, UserDirectory};
pub use engine::TreatmentEngine;
