//! Session persistence for the tableagent gateway.
//!
//! A `Session` is the unit of conversational state for one in-progress
//! analysis (spec §3). This crate owns its storage: a Redis-backed store for
//! real deployments, an in-memory store for tests, both behind the same
//! `SessionStore` trait with sliding-TTL semantics.

pub mod store;

pub use store::{InMemorySessionStore, RedisSessionStore, SessionStore};
