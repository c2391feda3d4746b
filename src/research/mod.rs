//! Research
//! Analyst agents, consensus merging and the analysis job pipeline.

pub mod agents;
pub mod consensus;
pub mod jobs;
pub mod models;
pub mod queue;
pub mod store;

pub use agents::{normalize_confidence, AnalysisAgent, PrimoAgentClient, TradingAgentsClient};
pub use consensus::{merge_consensus, ConsensusOutcome, Vote};
pub use jobs::{AnalysisJob, JobOutcome, JobRunner};
pub use models::*;
pub use queue::JobQueue;
pub use store::ResearchStore;
