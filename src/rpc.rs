//! HTTP plumbing for the remote endpoints: API-key authentication, client
//! options, reply classification, and the claim/settings client.

pub mod auth;
pub mod client;
pub mod options;
pub mod outcome;

pub use client::{JobClaimer, ProcessingClient, SettingsSource};
pub use options::ClientOptions;
pub use outcome::{classify_response, ClaimError, ClaimOutcome, NO_QUEUED_JOBS_MESSAGE};
