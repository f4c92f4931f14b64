//! `providers` crate: the side-effect collaborators a workflow step may call.
//!
//! Every collaborator is a trait object; the engine receives them bundled in
//! [`Providers`] and never depends on a concrete mailer, ledger or client.

pub mod error;
pub mod traits;
pub mod http;
pub mod logging;
pub mod mock;

use std::sync::Arc;

pub use error::ProviderError;
pub use traits::{
    DocumentStore, Email, HttpClient, HttpRequest, HttpResponse, Mailer, Member,
    MemberDirectory, Notification, NotificationService, PointsAward, PointsLedger,
};

/// All collaborators needed by the step dispatcher.
#[derive(Clone)]
pub struct Providers {
    pub mailer: Arc<dyn Mailer>,
    pub members: Arc<dyn MemberDirectory>,
    pub ledger: Arc<dyn PointsLedger>,
    pub notifications: Arc<dyn NotificationService>,
    pub http: Arc<dyn HttpClient>,
    pub documents: Arc<dyn DocumentStore>,
}

impl Providers {
    /// Development bundle: every side effect is written to the log, except
    /// HTTP calls which go out through `reqwest`.
    pub fn development() -> Result<Self, ProviderError> {
        let log = Arc::new(logging::TracingProvider);
        Ok(Self {
            mailer: log.clone(),
            members: log.clone(),
            ledger: log.clone(),
            notifications: log.clone(),
            http: Arc::new(http::ReqwestClient::new()?),
            documents: log,
        })
    }
}
