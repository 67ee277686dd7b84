//! Orchestrator module
//!
//! Drives minting runs and the channel demo under a shared retry envelope.

mod channel_demo;
mod engine;
mod retry;

pub use channel_demo::{ChannelDemo, ChannelDemoConfig, ChannelDemoReport};
pub use engine::{
    DomainOutcome, DomainStatus, Minter, MinterConfig, RunReport, RunState, RunStep, ZoneOutcome,
};
pub use retry::RetryPolicy;
