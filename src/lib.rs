//! Participant registration for the retreat: eligibility, validation,
//! student id numbering and persistence of whole families.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod assembler;
pub mod config;
pub mod db;
pub mod eligibility;
pub mod error;
pub mod form;
pub mod ids;
pub mod logging;
pub mod models;
pub mod report;
pub mod store;
pub mod validate;

pub use assembler::RegistrationAssembler;
pub use config::Settings;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use store::{MemoryStore, RecordStore};
