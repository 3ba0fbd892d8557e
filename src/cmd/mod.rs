//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `process` | `Process`        |
//! | `parse`   | `Parse`, `Sign`  |
//! | `config`  | `Config`         |

pub mod config;
pub mod parse;
pub mod process;
pub mod serve;

pub use config::cmd_config;
pub use parse::{cmd_parse, cmd_sign};
pub use process::cmd_process;
pub use serve::cmd_serve;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

/// Read a file, or stdin when `path` is `-`.
pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}
