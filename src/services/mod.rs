//! Business logic services for the gateway.
//!
//! This module contains the initiator classifier and the upstream client.

pub mod initiator;
pub mod upstream;

// Re-export commonly used types
pub use initiator::{has_claude_code_beta, infer_initiator, ClientHints, Initiator};
pub use upstream::{has_vision_content, UpstreamClient, UpstreamRequest};
