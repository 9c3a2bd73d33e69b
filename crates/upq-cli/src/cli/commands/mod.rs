//! CLI command handlers, one file per command.

mod cancel;
mod config;
mod upload;

pub use cancel::run_cancel;
pub use config::run_config;
pub use upload::run_upload;

#[cfg(test)]
pub(crate) use upload::{plan_batches, ConsoleSink};
