//! Step dispatcher: runs one step against the side-effect collaborators.
//!
//! Failure policy per step type:
//!
//! | type                  | fatal when                                        |
//! |-----------------------|---------------------------------------------------|
//! | `send_email`          | no recipient address resolves at all              |
//! | `award_points`        | the ledger call fails                             |
//! | `create_notification` | the notification call fails                       |
//! | `call_webhook`        | never (failures are retried, then absorbed)       |
//! | `update_data`         | the document patch fails                          |
//! | `conditional`         | never                                             |
//!
//! A missing `memberId`/`documentId` follows [`MissingTargetPolicy`].

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use providers::{Email, HttpRequest, HttpResponse, Notification, PointsAward, ProviderError, Providers};

use crate::condition::evaluate;
use crate::error::StepError;
use crate::executor::{ExecutorConfig, MissingTargetPolicy};
use crate::models::{
    AwardPointsConfig, CallWebhookConfig, ConditionalConfig, CreateNotificationConfig, RunContext,
    SendEmailConfig, StepAction, StepStatus, UpdateDataConfig, WorkflowStep,
};

/// Context key under which a `conditional` step stores its result.
pub const CONDITION_RESULT_KEY: &str = "_conditionResult";

/// What a successfully dispatched step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// `Success` or `Skipped`; failures travel as [`StepError`].
    pub status: StepStatus,
    pub output: Option<Value>,
    /// A non-fatal error that was absorbed.
    pub error: Option<String>,
    /// Step the orchestrator should jump to next (conditional branches).
    pub jump_to: Option<String>,
}

impl StepOutcome {
    pub fn completed(output: Option<Value>) -> Self {
        Self { status: StepStatus::Success, output, error: None, jump_to: None }
    }

    pub fn degraded(error: impl Into<String>, output: Value) -> Self {
        Self {
            status: StepStatus::Success,
            output: Some(output),
            error: Some(error.into()),
            jump_to: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            output: Some(json!({ "reason": reason.into() })),
            error: None,
            jump_to: None,
        }
    }
}

/// Executes individual steps. Holds no per-run state; one instance serves
/// every concurrent run.
pub struct StepDispatcher {
    providers: Providers,
    config: ExecutorConfig,
}

impl StepDispatcher {
    pub fn new(providers: Providers, config: ExecutorConfig) -> Self {
        Self { providers, config }
    }

    /// Run `step`. `Err` means the step failed fatally.
    #[instrument(skip_all, fields(step_id = %step.id, step_type = step.step_type()))]
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &mut RunContext,
    ) -> Result<StepOutcome, StepError> {
        match &step.action {
            StepAction::SendEmail(cfg) => self.send_email(cfg).await,
            StepAction::AwardPoints(cfg) => self.award_points(cfg, ctx).await,
            StepAction::CreateNotification(cfg) => self.create_notification(cfg, ctx).await,
            StepAction::CallWebhook(cfg) => Ok(self.call_webhook(cfg, ctx).await),
            StepAction::UpdateData(cfg) => self.update_data(cfg, ctx).await,
            StepAction::Conditional(cfg) => Ok(Self::conditional(cfg, ctx)),
            StepAction::Unsupported { step_type, .. } => {
                warn!(%step_type, "unknown step type, nothing to do");
                Ok(StepOutcome::completed(None))
            }
        }
    }

    // -----------------------------------------------------------------------
    // send_email
    // -----------------------------------------------------------------------

    async fn send_email(&self, cfg: &SendEmailConfig) -> Result<StepOutcome, StepError> {
        let recipients = self.resolve_recipients(cfg).await;
        if recipients.is_empty() {
            return Err(StepError::NoRecipient);
        }

        let email = Email {
            to: recipients.clone(),
            subject: cfg.subject.clone(),
            html: cfg.html.clone(),
            text: cfg.text.clone(),
            cc: cfg.cc.clone(),
            bcc: cfg.bcc.clone(),
            reply_to: cfg.reply_to.clone(),
            tags: cfg.tags.clone(),
            metadata: cfg.metadata.clone(),
        };

        let err = match self.providers.mailer.send(&email).await {
            Ok(()) => {
                info!(recipients = recipients.len(), "email sent");
                return Ok(StepOutcome::completed(Some(json!({ "sentTo": recipients }))));
            }
            Err(err) => err,
        };

        warn!(error = %err, "email send failed");
        let fallback = match &cfg.recipient_id {
            Some(member_id) => {
                let notification = Notification {
                    member_id: member_id.clone(),
                    title: cfg.subject.clone(),
                    message: cfg.text.clone().or_else(|| cfg.html.clone()).unwrap_or_default(),
                    kind: "email_fallback".to_owned(),
                };
                match self.providers.notifications.create(&notification).await {
                    Ok(()) => {
                        info!(%member_id, "fallback notification created");
                        json!(true)
                    }
                    Err(fallback_err) => {
                        warn!(%member_id, error = %fallback_err, "fallback notification failed");
                        json!(false)
                    }
                }
            }
            None => Value::Null,
        };

        Ok(StepOutcome::degraded(
            format!("email send failed: {err}"),
            json!({ "sentTo": [], "fallbackNotification": fallback }),
        ))
    }

    /// Explicit address first, otherwise every member lookup that yields one.
    async fn resolve_recipients(&self, cfg: &SendEmailConfig) -> Vec<String> {
        if let Some(address) = cfg.recipient_email.as_ref().filter(|a| !a.trim().is_empty()) {
            return vec![address.clone()];
        }

        let ids = cfg.recipient_id.iter().chain(cfg.recipient_ids.iter());
        let mut addresses = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            match self.providers.members.get_by_id(id).await {
                Ok(Some(member)) => match member.email {
                    Some(email) if !email.is_empty() => {
                        if seen.insert(email.clone()) {
                            addresses.push(email);
                        }
                    }
                    _ => debug!(member_id = %id, "member has no email address"),
                },
                Ok(None) => debug!(member_id = %id, "member not found"),
                Err(err) => warn!(member_id = %id, error = %err, "member lookup failed"),
            }
        }
        addresses
    }

    // -----------------------------------------------------------------------
    // award_points / create_notification
    // -----------------------------------------------------------------------

    async fn award_points(
        &self,
        cfg: &AwardPointsConfig,
        ctx: &RunContext,
    ) -> Result<StepOutcome, StepError> {
        let Some(member_id) = cfg.member_id.clone().or_else(|| context_str(ctx, "memberId")) else {
            return self.missing_target("memberId");
        };

        let award = PointsAward {
            member_id: member_id.clone(),
            category: cfg.category.clone(),
            amount: cfg.amount,
            description: cfg.description.clone(),
            related_entity_id: cfg.related_entity_id.clone(),
            related_entity_type: cfg.related_entity_type.clone(),
        };
        self.providers
            .ledger
            .award(&award)
            .await
            .map_err(|source| StepError::Provider { action: "points award", source })?;

        info!(%member_id, amount = cfg.amount, "points awarded");
        Ok(StepOutcome::completed(Some(json!({
            "memberId": member_id,
            "category": cfg.category,
            "amount": cfg.amount,
        }))))
    }

    async fn create_notification(
        &self,
        cfg: &CreateNotificationConfig,
        ctx: &RunContext,
    ) -> Result<StepOutcome, StepError> {
        let Some(member_id) = cfg.member_id.clone().or_else(|| context_str(ctx, "memberId")) else {
            return self.missing_target("memberId");
        };

        let notification = Notification {
            member_id: member_id.clone(),
            title: cfg.title.clone(),
            message: cfg.message.clone(),
            kind: cfg.kind.clone(),
        };
        self.providers
            .notifications
            .create(&notification)
            .await
            .map_err(|source| StepError::Provider { action: "notification", source })?;

        Ok(StepOutcome::completed(Some(json!({ "memberId": member_id }))))
    }

    // -----------------------------------------------------------------------
    // call_webhook
    // -----------------------------------------------------------------------

    /// Never fails the run: transient failures are retried with exponential
    /// back-off, then whatever happened is recorded on the step.
    async fn call_webhook(&self, cfg: &CallWebhookConfig, ctx: &RunContext) -> StepOutcome {
        let request = HttpRequest {
            method: cfg.method.clone(),
            url: cfg.url.clone(),
            headers: cfg.headers.clone(),
            body: Some(cfg.body.clone().unwrap_or_else(|| Value::Object(ctx.clone()))),
        };

        let (result, attempts) = self.request_with_retry(&request).await;
        match result {
            Ok(response) if response.is_success() => {
                info!(url = %cfg.url, status = response.status, "webhook delivered");
                StepOutcome::completed(Some(json!({
                    "status": response.status,
                    "attempts": attempts,
                })))
            }
            Ok(response) => {
                warn!(url = %cfg.url, status = response.status, "webhook rejected");
                StepOutcome::degraded(
                    format!("webhook returned HTTP {}", response.status),
                    json!({ "status": response.status, "attempts": attempts, "body": response.body }),
                )
            }
            Err(err) => {
                warn!(url = %cfg.url, error = %err, "webhook request failed");
                StepOutcome::degraded(
                    format!("webhook request failed: {err}"),
                    json!({ "attempts": attempts }),
                )
            }
        }
    }

    async fn request_with_retry(
        &self,
        request: &HttpRequest,
    ) -> (Result<HttpResponse, ProviderError>, u32) {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = self.providers.http.request(request).await;

            let retryable = match &result {
                Ok(response) => response.status >= 500 || response.status == 429,
                Err(err) => err.is_transient(),
            };
            if !retryable || attempts > self.config.max_retries {
                return (result, attempts);
            }

            let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempts - 1);
            warn!(
                url = %request.url,
                attempt = attempts,
                max_retries = self.config.max_retries,
                ?delay,
                "webhook attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    // -----------------------------------------------------------------------
    // update_data
    // -----------------------------------------------------------------------

    async fn update_data(
        &self,
        cfg: &UpdateDataConfig,
        ctx: &RunContext,
    ) -> Result<StepOutcome, StepError> {
        let Some(document_id) = cfg.document_id.clone().or_else(|| context_str(ctx, "documentId"))
        else {
            return self.missing_target("documentId");
        };

        self.providers
            .documents
            .patch(&cfg.collection, &document_id, &cfg.fields)
            .await
            .map_err(|source| StepError::Provider { action: "document update", source })?;

        info!(collection = %cfg.collection, %document_id, "document updated");
        Ok(StepOutcome::completed(Some(json!({
            "collection": cfg.collection,
            "documentId": document_id,
            "fields": cfg.fields.keys().collect::<Vec<_>>(),
        }))))
    }

    // -----------------------------------------------------------------------
    // conditional
    // -----------------------------------------------------------------------

    fn conditional(cfg: &ConditionalConfig, ctx: &mut RunContext) -> StepOutcome {
        let result = evaluate(Some(&cfg.condition), ctx);
        ctx.insert(CONDITION_RESULT_KEY.to_owned(), Value::Bool(result));

        let target = if result { cfg.on_true.clone() } else { cfg.on_false.clone() };
        debug!(result, next = ?target, "condition evaluated");

        StepOutcome {
            jump_to: target.clone(),
            ..StepOutcome::completed(Some(json!({ "result": result, "next": target })))
        }
    }

    fn missing_target(&self, target: &'static str) -> Result<StepOutcome, StepError> {
        match self.config.missing_target {
            MissingTargetPolicy::Skip => {
                info!(%target, "no target resolvable, skipping step");
                Ok(StepOutcome::skipped(format!("no {target}")))
            }
            MissingTargetPolicy::Fail => Err(StepError::MissingTarget(target)),
        }
    }
}

/// A context entry as a string; numbers are accepted and rendered.
fn context_str(ctx: &RunContext, key: &str) -> Option<String> {
    match ctx.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
