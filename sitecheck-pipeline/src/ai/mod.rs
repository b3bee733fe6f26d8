//! Reasoning-service integration
//!
//! - [`client`]: the [`ReasoningClient`] seam and request bounds
//! - [`http`]: reqwest implementation
//! - [`refinement`]: generate → validate → refine loop for sequencing

pub mod client;
pub mod context;
pub mod http;
pub mod json;
pub mod mock;
pub mod prompts;
pub mod refinement;

pub use client::{ReasoningClient, ReasoningError, ReasoningRequest, ReasoningResponse};
pub use context::SequencingContext;
pub use http::HttpReasoningClient;
pub use json::extract_json_object;
pub use mock::ScriptedReasoningClient;
pub use refinement::{PhaseUsage, RefinementLoop, RefinementOutcome};
