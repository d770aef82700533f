//! Tool-augmented trading analysis agent.
//!
//! The reasoning loop ([`graph::TradingGraph`]) alternates between a chat
//! model call and mock market data tools, yielding one [`step::StepResult`]
//! per node execution. Consumers drive it through the [`step::AgentRunner`]
//! trait and never see the loop internals.

pub mod chat;
pub mod graph;
pub mod step;
pub mod testing;
pub mod tools;
