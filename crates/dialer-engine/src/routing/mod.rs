//! Queue routing
//!
//! Decides which call queue a user belongs in from the current state of their
//! claim. The precedence is fixed: an unsigned signature beats outstanding
//! requirements, which beat everything else. Routing is a pure function so the
//! same context always lands in the same queue.
//!
//! Claim state comes from outside the engine through the [`UserClaimLookup`]
//! trait; [`StaticClaimLookup`] is the in-memory implementation used by tools
//! and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};
use crate::queue::QueueType;

/// Snapshot of the claim state that drives routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimContext {
    /// The user the claim belongs to
    pub user_id: String,
    /// The claim being worked
    pub claim_id: String,
    /// A required signature has not been collected
    pub signature_outstanding: bool,
    /// Documentation requirements remain unmet
    pub requirements_outstanding: bool,
    /// The user still needs to be reached about something else
    pub contact_outstanding: bool,
}

impl ClaimContext {
    /// Context with nothing outstanding
    pub fn resolved(user_id: impl Into<String>, claim_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            claim_id: claim_id.into(),
            signature_outstanding: false,
            requirements_outstanding: false,
            contact_outstanding: false,
        }
    }

    /// True when no call is needed at all
    pub fn is_resolved(&self) -> bool {
        !self.signature_outstanding && !self.requirements_outstanding && !self.contact_outstanding
    }
}

/// Source of claim state for routing decisions
#[async_trait]
pub trait UserClaimLookup: Send + Sync {
    /// Fetch the current claim context for a user
    async fn lookup(&self, user_id: &str, claim_id: &str) -> Result<ClaimContext>;
}

/// Routes users to call queues by claim state
pub struct QueueRouter;

impl QueueRouter {
    /// Pick the queue for a claim context.
    ///
    /// Signature requests take precedence over requirement chases; anything
    /// else still worth a call goes to the generic queue.
    pub fn route(ctx: &ClaimContext) -> QueueType {
        if ctx.signature_outstanding {
            QueueType::UnsignedSignature
        } else if ctx.requirements_outstanding {
            QueueType::OutstandingRequirements
        } else {
            QueueType::Generic
        }
    }

    /// Human-readable reason line recorded on the queue entry
    pub fn queue_reason(ctx: &ClaimContext) -> String {
        if ctx.signature_outstanding {
            format!("signature outstanding on claim {}", ctx.claim_id)
        } else if ctx.requirements_outstanding {
            format!("requirements outstanding on claim {}", ctx.claim_id)
        } else {
            format!("follow-up needed on claim {}", ctx.claim_id)
        }
    }
}

/// In-memory claim lookup backed by a map, for tools and tests
#[derive(Default)]
pub struct StaticClaimLookup {
    contexts: RwLock<HashMap<String, ClaimContext>>,
}

impl StaticClaimLookup {
    /// Create an empty lookup
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the context for a (user, claim) pair
    pub fn set(&self, ctx: ClaimContext) {
        let key = Self::key(&ctx.user_id, &ctx.claim_id);
        self.contexts.write().insert(key, ctx);
    }

    fn key(user_id: &str, claim_id: &str) -> String {
        format!("{user_id}/{claim_id}")
    }
}

#[async_trait]
impl UserClaimLookup for StaticClaimLookup {
    async fn lookup(&self, user_id: &str, claim_id: &str) -> Result<ClaimContext> {
        self.contexts
            .read()
            .get(&Self::key(user_id, claim_id))
            .cloned()
            .ok_or_else(|| {
                DialerError::not_found(format!("no claim context for user {user_id} claim {claim_id}"))
            })
    }
}
