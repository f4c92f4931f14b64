//! `TracingProvider`: a stand-in for every collaborator that only logs.
//!
//! Used by the CLI when no real mailer, ledger or document store is wired in,
//! so a workflow can be exercised end to end on a developer machine.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    DocumentStore, Email, Mailer, Member, MemberDirectory, Notification, NotificationService,
    PointsAward, PointsLedger, ProviderError,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProvider;

#[async_trait]
impl Mailer for TracingProvider {
    async fn send(&self, email: &Email) -> Result<(), ProviderError> {
        info!(to = ?email.to, subject = %email.subject, "email accepted");
        Ok(())
    }
}

#[async_trait]
impl MemberDirectory for TracingProvider {
    async fn get_by_id(&self, id: &str) -> Result<Option<Member>, ProviderError> {
        info!(member_id = %id, "member lookup (no directory configured)");
        Ok(None)
    }
}

#[async_trait]
impl PointsLedger for TracingProvider {
    async fn award(&self, award: &PointsAward) -> Result<(), ProviderError> {
        info!(
            member_id = %award.member_id,
            category = %award.category,
            amount = award.amount,
            "points awarded"
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationService for TracingProvider {
    async fn create(&self, notification: &Notification) -> Result<(), ProviderError> {
        info!(
            member_id = %notification.member_id,
            title = %notification.title,
            kind = %notification.kind,
            "notification created"
        );
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for TracingProvider {
    async fn patch(
        &self,
        collection: &str,
        document_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), ProviderError> {
        info!(%collection, %document_id, fields = fields.len(), "document patched");
        Ok(())
    }
}
