//! Mailflow — mail-transport processing core.
//!
//! Decides, for every inbound message, which recipients are affected by
//! which processing action, how a message moves between named stages, how
//! much traffic a scope may push through a time window, and how addresses
//! are rewritten before delivery or durable storage. Protocol front-ends,
//! MIME parsing, and the administration surface live outside this crate and
//! talk to it through [`spool::Spool`], [`repository::RepositoryRegistry`],
//! and the matcher/action contracts in [`pipeline`].

pub mod config;
pub mod context;
pub mod error;
pub mod limiter;
pub mod model;
pub mod pipeline;
pub mod repository;
pub mod resolver;
pub mod spool;
