//! Adapters for the Quorum Gate ports

pub mod checker_adapter;
pub mod confidence_floor;
pub mod event_bus;
pub mod risk_limits;
pub mod time;

pub use checker_adapter::CheckerAdapter;
pub use confidence_floor::ProposalConfidenceChecker;
pub use event_bus::{InMemoryVoteRequestBus, NoopVoteRequestPublisher, DEFAULT_CHANNEL_CAPACITY};
pub use risk_limits::{RiskLimitChecker, RiskLimits};
pub use time::{ManualTimeSource, SystemTimeSource};
