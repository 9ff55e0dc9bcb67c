//! Configuration for trawler agents
//!
//! Options are layered file → environment → CLI, then finalized (header
//! derivation) and wrapped in [`SharedConfig`] for the lifetime of the
//! process so the control plane can mutate them while the loop runs.

mod parser;
mod shared;
mod types;

pub use parser::{apply_env, coerce_bool, finalize, load_config, parse_header_line};
pub use shared::{SharedConfig, StopSignal};
pub use types::AgentConfig;
