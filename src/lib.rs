#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod retry;
pub mod security;
pub mod tools;

pub use config::Config;
pub use error::{PilotError, Result};
pub use orchestrator::{ObjectiveReport, Orchestrator};
