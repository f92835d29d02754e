pub mod action;
pub mod config;
pub mod error;
pub mod expr;
pub mod io;
pub mod matrix;
pub mod paths;
pub mod plan;
pub mod record;
pub mod templates;
pub mod trigger;
pub mod validate;
pub mod workflow;

pub use error::{CiError, Result};
