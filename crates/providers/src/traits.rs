//! Collaborator contracts: the side effects a workflow step may perform.
//!
//! The engine never talks to a mailer, ledger or HTTP endpoint directly; it
//! goes through these traits so each deployment (and each test) can plug in
//! its own implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProviderError;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// An outgoing email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// The subset of a member record the engine cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A points-ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsAward {
    pub member_id: String,
    pub category: String,
    pub amount: i64,
    pub description: String,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
}

/// An in-app notification for one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub member_id: String,
    pub title: String,
    pub message: String,
    pub kind: String,
}

/// An arbitrary outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email. An `Err` means the message was not accepted.
    async fn send(&self, email: &Email) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Look up a member; `Ok(None)` when no such member exists.
    async fn get_by_id(&self, id: &str) -> Result<Option<Member>, ProviderError>;
}

#[async_trait]
pub trait PointsLedger: Send + Sync {
    async fn award(&self, award: &PointsAward) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<(), ProviderError>;
}

/// Generic HTTP client.
///
/// Implementations return `Ok` for any response that arrived, including
/// non-2xx statuses; `Err` is reserved for transport failures.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError>;
}

/// Partial update of an application document (`update_data` steps).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn patch(
        &self,
        collection: &str,
        document_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), ProviderError>;
}
