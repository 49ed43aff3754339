//! Ports module for the Quorum Gate

pub mod inbound;
pub mod outbound;

pub use inbound::QuorumGateApi;
pub use outbound::{
    Checker, CheckerVerdict, ExecutionCallback, ExecutionRequest, TimeSource,
    VoteRequestPublisher,
};
