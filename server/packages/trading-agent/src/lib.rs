//! Streaming HTTP gateway for the trading analysis agent.
//!
//! One generation = one `/generate` request: the gateway registers it,
//! drives the reasoning loop, and streams its output as server-sent
//! events. A concurrent `/stop_generation` request flips a cancellation
//! flag that the stream controller honors at its next checkpoint.

pub mod cli;
pub mod generation;
pub mod registry;
pub mod router;
