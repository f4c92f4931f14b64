//! Recording test doubles for every collaborator.
//!
//! Each mock records the payloads it receives and behaves as instructed at
//! construction time. [`MockProviders`] bundles one of each so a test can
//! build a dispatcher in one line and inspect the calls afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    DocumentStore, Email, HttpClient, HttpRequest, HttpResponse, Mailer, Member,
    MemberDirectory, Notification, NotificationService, PointsAward, PointsLedger,
    ProviderError, Providers,
};

/// Behaviour injected into a mock at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Accept the call.
    Succeed,
    /// Fail with the given error.
    Fail(ProviderError),
    /// Never resolve; used to exercise step deadlines.
    Hang,
}

impl MockBehaviour {
    async fn act(&self) -> Result<(), ProviderError> {
        match self {
            Self::Succeed => Ok(()),
            Self::Fail(err) => Err(err.clone()),
            Self::Hang => std::future::pending().await,
        }
    }
}

/// A recorder shared by every mock: payloads in call order.
#[derive(Debug)]
pub struct Calls<T>(Arc<Mutex<Vec<T>>>);

impl<T> Default for Calls<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Calls<T> {
    fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

pub struct MockMailer {
    pub behaviour: MockBehaviour,
    pub calls: Calls<Email>,
}

impl MockMailer {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self { behaviour, calls: Calls::default() }
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &Email) -> Result<(), ProviderError> {
        self.calls.push(email.clone());
        self.behaviour.act().await
    }
}

// ---------------------------------------------------------------------------
// Member directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockMemberDirectory {
    members: Mutex<HashMap<String, Member>>,
}

impl MockMemberDirectory {
    /// Register a member with the given email address.
    pub fn insert(&self, id: &str, email: Option<&str>) {
        self.members.lock().unwrap().insert(
            id.to_owned(),
            Member { id: id.to_owned(), email: email.map(str::to_owned), name: None },
        );
    }
}

#[async_trait]
impl MemberDirectory for MockMemberDirectory {
    async fn get_by_id(&self, id: &str) -> Result<Option<Member>, ProviderError> {
        Ok(self.members.lock().unwrap().get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Points ledger
// ---------------------------------------------------------------------------

pub struct MockLedger {
    pub behaviour: MockBehaviour,
    pub calls: Calls<PointsAward>,
}

impl MockLedger {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self { behaviour, calls: Calls::default() }
    }
}

#[async_trait]
impl PointsLedger for MockLedger {
    async fn award(&self, award: &PointsAward) -> Result<(), ProviderError> {
        self.calls.push(award.clone());
        self.behaviour.act().await
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub struct MockNotifier {
    pub behaviour: MockBehaviour,
    pub calls: Calls<Notification>,
}

impl MockNotifier {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self { behaviour, calls: Calls::default() }
    }
}

#[async_trait]
impl NotificationService for MockNotifier {
    async fn create(&self, notification: &Notification) -> Result<(), ProviderError> {
        self.calls.push(notification.clone());
        self.behaviour.act().await
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Replays scripted responses in order; once the script runs out every
/// further call gets `fallback`.
pub struct MockHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, ProviderError>>>,
    fallback: Result<HttpResponse, ProviderError>,
    pub calls: Calls<HttpRequest>,
}

impl MockHttpClient {
    /// Always answer with `status` and an empty body.
    pub fn responding(status: u16) -> Self {
        Self::scripted(Vec::new(), Ok(HttpResponse { status, body: String::new() }))
    }

    /// Always fail with a transient transport error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::scripted(Vec::new(), Err(ProviderError::Transient(message.into())))
    }

    pub fn scripted(
        script: Vec<Result<HttpResponse, ProviderError>>,
        fallback: Result<HttpResponse, ProviderError>,
    ) -> Self {
        Self { script: Mutex::new(script.into()), fallback, calls: Calls::default() }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        self.calls.push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

pub struct MockDocumentStore {
    pub behaviour: MockBehaviour,
    pub calls: Calls<(String, String, Map<String, Value>)>,
}

impl MockDocumentStore {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self { behaviour, calls: Calls::default() }
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn patch(
        &self,
        collection: &str,
        document_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), ProviderError> {
        self.calls
            .push((collection.to_owned(), document_id.to_owned(), fields.clone()));
        self.behaviour.act().await
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// One mock of each collaborator, all succeeding by default.
pub struct MockProviders {
    pub mailer: Arc<MockMailer>,
    pub members: Arc<MockMemberDirectory>,
    pub ledger: Arc<MockLedger>,
    pub notifications: Arc<MockNotifier>,
    pub http: Arc<MockHttpClient>,
    pub documents: Arc<MockDocumentStore>,
}

impl Default for MockProviders {
    fn default() -> Self {
        Self {
            mailer: Arc::new(MockMailer::new(MockBehaviour::Succeed)),
            members: Arc::new(MockMemberDirectory::default()),
            ledger: Arc::new(MockLedger::new(MockBehaviour::Succeed)),
            notifications: Arc::new(MockNotifier::new(MockBehaviour::Succeed)),
            http: Arc::new(MockHttpClient::responding(200)),
            documents: Arc::new(MockDocumentStore::new(MockBehaviour::Succeed)),
        }
    }
}

impl MockProviders {
    pub fn with_mailer(mut self, behaviour: MockBehaviour) -> Self {
        self.mailer = Arc::new(MockMailer::new(behaviour));
        self
    }

    pub fn with_ledger(mut self, behaviour: MockBehaviour) -> Self {
        self.ledger = Arc::new(MockLedger::new(behaviour));
        self
    }

    pub fn with_notifications(mut self, behaviour: MockBehaviour) -> Self {
        self.notifications = Arc::new(MockNotifier::new(behaviour));
        self
    }

    pub fn with_http(mut self, http: MockHttpClient) -> Self {
        self.http = Arc::new(http);
        self
    }

    pub fn with_documents(mut self, behaviour: MockBehaviour) -> Self {
        self.documents = Arc::new(MockDocumentStore::new(behaviour));
        self
    }

    /// The trait-object bundle the engine consumes; the mocks stay shared.
    pub fn providers(&self) -> Providers {
        Providers {
            mailer: self.mailer.clone(),
            members: self.members.clone(),
            ledger: self.ledger.clone(),
            notifications: self.notifications.clone(),
            http: self.http.clone(),
            documents: self.documents.clone(),
        }
    }
}
