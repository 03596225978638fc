//! Core runtime: sessions, prompt building, the LLM turn loop, tool
//! dispatch, rate limiting, and quota accounting, tied into one
//! deterministic state machine (spec §4.8).
//!
//! Entry point: [`turn::run_turn`] drives a session through one or more
//! LLM turns and writes events to an `AgentEvent` channel suitable for SSE.

pub mod events;
pub mod prompt;
pub mod quota;
pub mod rate_limit;
pub mod session_lock;
pub mod tools;
pub mod turn;
