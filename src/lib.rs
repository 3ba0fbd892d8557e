//! issue2pr: turn GitHub issues into pull requests.
//!
//! A webhook delivery is authenticated and classified by [`webhook`],
//! deduplicated by [`idempotency`], and handed to the [`pipeline`], which
//! asks a [`generator`] for code, parses the answer with [`response`] and
//! materializes it through a repository client such as [`github`].

pub mod config;
pub mod errors;
pub mod generator;
pub mod github;
pub mod idempotency;
pub mod models;
pub mod pipeline;
pub mod response;
pub mod server;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod webhook;
