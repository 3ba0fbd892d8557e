//! Model response handling.
//!
//! Converts the code generator's free-form markdown output into a
//! deterministic [`ChangeSet`] and rejects degenerate sets before the
//! pipeline applies them:
//!
//! - `parser`: tokenizer and state machine for the marker and section dialects
//! - `types`: `FileChange`, `ChangeSet`, `ParsedResponse`, `Dialect`
//! - `validate`: empty, duplicate and unsafe path checks

mod parser;
mod types;
mod validate;

pub use parser::{LineKind, ResponseParser, Section, Token, detect_dialect, parse_changes, tokenize};
pub use types::{ChangeSet, DEFAULT_EXPLANATION, Dialect, FileChange, ParsedResponse};
pub use validate::{normalize_path, validate};
