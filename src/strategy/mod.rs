//! Execution Strategies
//!
//! Parsing normally runs inline on the caller's thread. `worker` moves
//! parse requests onto one dedicated, lazily started thread instead.

pub mod worker;

pub use worker::WorkerError;
