//! The answering side of the protocol.

use crate::proto::{RejectReason, SyncRequest, SyncResponse};
use std::sync::Arc;
use tally_hlc::ClockError;
use tally_store::{Replica, StoreError};
use tracing::{debug, warn};

/// Largest page a server will return, whatever the client asks for.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Serves [`SyncRequest`]s against a local replica.
pub struct SyncServer {
    replica: Arc<Replica>,
}

impl SyncServer {
    pub fn new(replica: Arc<Replica>) -> Self {
        SyncServer { replica }
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Answer one request. Failures become `Rejected` responses.
    pub fn handle(&self, request: SyncRequest) -> SyncResponse {
        let kind = request.kind();
        let response = match request {
            SyncRequest::Clock { timestamp } => match self.replica.observe(&timestamp) {
                Ok(_) => SyncResponse::Clock {
                    timestamp: self.replica.timestamp(),
                },
                Err(e) => rejected(e),
            },

            SyncRequest::Summary { prefix } => SyncResponse::Summary {
                summary: self.replica.merkle().summary(&prefix),
            },

            SyncRequest::MessagesSince {
                since,
                cursor,
                limit,
            } => {
                let page = self
                    .replica
                    .messages_since(since, cursor.as_ref(), limit.min(MAX_PAGE_SIZE));
                SyncResponse::Messages {
                    messages: page.messages,
                    next_cursor: page.next_cursor,
                }
            }

            SyncRequest::Push { messages } => match self.replica.receive(messages) {
                Ok(report) => SyncResponse::Pushed {
                    applied: report.applied(),
                },
                Err(e) => rejected(e),
            },
        };

        match &response {
            SyncResponse::Rejected { reason, message } => {
                warn!(request = kind, ?reason, %message, "Rejected sync request");
            }
            other => debug!(request = kind, response = other.kind(), "Served sync request"),
        }
        response
    }
}

fn rejected(err: StoreError) -> SyncResponse {
    let reason = match &err {
        StoreError::Clock(ClockError::DuplicateNode(_)) => RejectReason::DuplicateNode,
        StoreError::Clock(_) => RejectReason::ClockDrift,
        StoreError::Codec(_) => RejectReason::InvalidRequest,
        StoreError::Storage(_) | StoreError::CorruptClock(_) => RejectReason::Storage,
    };
    SyncResponse::Rejected {
        reason,
        message: err.to_string(),
    }
}
