//! CLI command implementations.

mod discover;
mod info;
mod run;

pub use discover::discover;
pub use info::show_info;
pub use run::{run_service, RunOptions};
