//! Offline helpers: `issue2pr parse` and `issue2pr sign`.

use std::path::Path;

use anyhow::{Context, Result};

use issue2pr::response::{Dialect, ResponseParser, validate};
use issue2pr::webhook::format_signature_header;

use super::read_input;

pub fn cmd_parse(input: &Path, dialect: Option<&str>, run_validation: bool) -> Result<()> {
    let raw = read_input(input)?;
    let text = String::from_utf8_lossy(&raw);

    let parser = match dialect {
        Some(name) => {
            let dialect: Dialect = name
                .parse()
                .map_err(|e| anyhow::anyhow!("{}", e))
                .context("Invalid --dialect")?;
            ResponseParser::with_dialect(dialect)
        }
        None => ResponseParser::new(),
    };
    let parsed = parser.parse(&text);

    for warning in &parsed.warnings {
        eprintln!("warning: {}", warning);
    }

    if run_validation {
        validate(parsed.changes.clone()).context("Change set rejected")?;
    }

    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

pub fn cmd_sign(secret: &str, input: &Path) -> Result<()> {
    let body = read_input(input)?;
    println!("{}", format_signature_header(secret, &body));
    Ok(())
}
