//! Test utilities: in-memory transports and stores for exercising the
//! service without network or disk.
//!
//! Enabled via the `test-util` feature flag.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use ets_core::testutil::TokenFixture;
use ets_core::{Attestation, Op, Timestamp};
use ets_types::{Chain, Digest, EvidenceRecord};

use crate::aggregate::CalendarAggregator;
use crate::authority::TimestampAuthority;
use crate::calendar::CalendarTransport;
use crate::evidence::EvidenceService;
use crate::provider::{AuthorityProvider, CalendarProvider, ProofProvider, ProviderChain};
use crate::resolver::{AttestationResolver, BlockHashLookup, ExplorerTemplates};
use crate::storage::{apply_update, newest_first, BlobKind, BlobStore, RecordStore, StatusUpdate};
use crate::{ClientError, Result};

/// A calendar's answer to a digest submission: `digest || nonce`, hashed,
/// then a pending attestation for `uri`
pub fn calendar_response(digest: &Digest, nonce: &[u8], uri: &str) -> Timestamp {
    let mut root = Timestamp::new(digest.as_bytes().to_vec());
    root.add_op(Op::Append(nonce.to_vec()))
        .expect("append fits")
        .add_op(Op::Sha256)
        .expect("sha256 fits")
        .add_attestation(Attestation::Pending { uri: uri.to_string() });
    root
}

/// A calendar's answer to an upgrade request: a path from `commitment` to a
/// Bitcoin block header attestation
pub fn upgrade_response(commitment: &[u8], height: u32) -> Timestamp {
    let mut root = Timestamp::new(commitment.to_vec());
    root.add_op(Op::Prepend(height.to_be_bytes().to_vec()))
        .expect("prepend fits")
        .add_op(Op::Sha256)
        .expect("sha256 fits")
        .add_attestation(Attestation::Bitcoin { height });
    root
}

/// Scripted calendar transport keyed by endpoint
#[derive(Default)]
pub struct MockCalendar {
    submits: HashMap<String, Result<Timestamp>>,
    upgrades: HashMap<String, Result<Timestamp>>,
    delay: Option<Duration>,
    submit_calls: AtomicUsize,
    upgrade_calls: AtomicUsize,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submit(mut self, endpoint: &str, response: Timestamp) -> Self {
        self.submits.insert(endpoint.to_string(), Ok(response));
        self
    }

    pub fn with_submit_error(mut self, endpoint: &str, error: ClientError) -> Self {
        self.submits.insert(endpoint.to_string(), Err(error));
        self
    }

    pub fn with_upgrade(mut self, endpoint: &str, response: Timestamp) -> Self {
        self.upgrades.insert(endpoint.to_string(), Ok(response));
        self
    }

    pub fn with_upgrade_error(mut self, endpoint: &str, error: ClientError) -> Self {
        self.upgrades.insert(endpoint.to_string(), Err(error));
        self
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn upgrade_calls(&self) -> usize {
        self.upgrade_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, script: &HashMap<String, Result<Timestamp>>, endpoint: &str) -> Result<Timestamp> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        script
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| Err(ClientError::Network(format!("no route to {}", endpoint))))
    }
}

#[async_trait]
impl CalendarTransport for MockCalendar {
    async fn submit(&self, endpoint: &str, _digest: &Digest) -> Result<Timestamp> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.submits, endpoint).await
    }

    async fn fetch_upgrade(&self, endpoint: &str, _commitment: &[u8]) -> Result<Timestamp> {
        self.upgrade_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.upgrades, endpoint).await
    }
}

/// Scripted block hash lookup that counts calls
#[derive(Default)]
pub struct MockLookup {
    hashes: HashMap<(Chain, u32), Result<String>>,
    calls: AtomicUsize,
}

impl MockLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash(mut self, chain: Chain, height: u32, hash: &str) -> Self {
        self.hashes.insert((chain, height), Ok(hash.to_string()));
        self
    }

    pub fn with_error(mut self, chain: Chain, height: u32, error: ClientError) -> Self {
        self.hashes.insert((chain, height), Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockHashLookup for MockLookup {
    async fn block_hash(&self, chain: Chain, height: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hashes
            .get(&(chain, height))
            .cloned()
            .unwrap_or_else(|| Err(ClientError::LookupApi("block hash api disabled".to_string())))
    }
}

/// Authority that always gives the same answer
pub struct MockAuthority {
    response: Result<Vec<u8>>,
    calls: AtomicUsize,
}

impl MockAuthority {
    pub fn responding(bytes: Vec<u8>) -> Self {
        Self {
            response: Ok(bytes),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ClientError) -> Self {
        Self {
            response: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self::failing(ClientError::Network("connection refused".to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimestampAuthority for MockAuthority {
    fn url(&self) -> &str {
        "mock://tsa"
    }

    async fn request(&self, _digest: &Digest) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<Digest, EvidenceRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().expect("record store poisoned").is_empty()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn fetch(&self, hash: &Digest) -> Result<Option<EvidenceRecord>> {
        Ok(self.records.lock().expect("record store poisoned").get(hash).cloned())
    }

    fn insert_if_absent(&self, record: EvidenceRecord) -> Result<EvidenceRecord> {
        let mut records = self.records.lock().expect("record store poisoned");
        Ok(records.entry(record.hash).or_insert(record).clone())
    }

    fn upsert(&self, update: &StatusUpdate) -> Result<EvidenceRecord> {
        let mut records = self.records.lock().expect("record store poisoned");
        let record = apply_update(records.remove(&update.hash), update);
        records.insert(update.hash, record.clone());
        Ok(record)
    }

    fn delete(&self, hash: &Digest) -> Result<bool> {
        Ok(self.records.lock().expect("record store poisoned").remove(hash).is_some())
    }

    fn list(&self) -> Result<Vec<EvidenceRecord>> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .expect("record store poisoned")
            .values()
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }
}

/// Blob store over a map of virtual paths `<hash>/<hash>.<ext>`
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a blob behind the service's back
    pub fn remove(&self, path: &Path) -> Option<Vec<u8>> {
        self.blobs.lock().expect("blob store poisoned").remove(path)
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.blobs.lock().expect("blob store poisoned").get(path).cloned()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn save(&self, hash: &Digest, kind: BlobKind, bytes: &[u8]) -> Result<PathBuf> {
        let path = PathBuf::from(hash.to_hex()).join(format!("{}.{}", hash.to_hex(), kind.extension()));
        self.blobs
            .lock()
            .expect("blob store poisoned")
            .insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.get(path))
    }

    fn overwrite(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .expect("blob store poisoned")
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn delete_all(&self, hash: &Digest) -> Result<()> {
        let dir = PathBuf::from(hash.to_hex());
        self.blobs
            .lock()
            .expect("blob store poisoned")
            .retain(|path, _| !path.starts_with(&dir));
        Ok(())
    }
}

/// An evidence service over mocks, with handles to every collaborator
pub struct MockHarness {
    pub service: EvidenceService,
    pub records: Arc<InMemoryRecordStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub calendar: Arc<MockCalendar>,
    pub lookup: Arc<MockLookup>,
    pub authority: Arc<MockAuthority>,
}

pub fn mock_service(
    calendar: MockCalendar,
    lookup: MockLookup,
    authority: MockAuthority,
    endpoints: &[&str],
) -> MockHarness {
    let records = Arc::new(InMemoryRecordStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let calendar = Arc::new(calendar);
    let lookup = Arc::new(lookup);
    let authority = Arc::new(authority);

    let resolver = AttestationResolver::new(calendar.clone(), lookup.clone()).with_explorer(
        Chain::Bitcoin,
        ExplorerTemplates::new(
            "https://blockchair.com/bitcoin/block/{hash}",
            "https://blockchair.com/bitcoin/block/{height}",
        ),
    );
    let ots = CalendarProvider::new(
        CalendarAggregator::new(calendar.clone()),
        resolver,
        endpoints.iter().map(|e| e.to_string()).collect(),
    );
    let ots: Arc<dyn ProofProvider> = Arc::new(ots);
    let tsa: Arc<dyn ProofProvider> = Arc::new(AuthorityProvider::new(authority.clone()));

    let service = EvidenceService::new(
        records.clone(),
        blobs.clone(),
        ProviderChain::resolve("ots", vec![ots]),
        ProviderChain::resolve("tsa", vec![tsa]),
    );
    MockHarness {
        service,
        records,
        blobs,
        calendar,
        lookup,
        authority,
    }
}

/// Behaviour of a [`TestServer`]
#[derive(Debug, Clone, Default)]
pub struct TestServerOptions {
    /// Answer every route with this status instead of a proof
    pub fail_status: Option<u16>,
    /// Answer upgrade requests with a Bitcoin anchor at this height;
    /// `None` answers 404 like a calendar still waiting for confirmation
    pub anchor_height: Option<u32>,
    /// Body of block hash lookups; `None` derives a hash from the height
    pub block_hash_body: Option<String>,
}

struct ServerState {
    url: String,
    options: TestServerOptions,
    requests: AtomicUsize,
}

impl ServerState {
    fn begin(&self) -> Option<Response> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.options.fail_status.map(|code| {
            StatusCode::from_u16(code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        })
    }
}

fn proof_response(timestamp: &Timestamp) -> Response {
    match timestamp.to_bytes() {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn submit_digest(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    if let Some(failure) = state.begin() {
        return failure;
    }
    match Digest::from_slice(&body) {
        Ok(digest) => proof_response(&calendar_response(&digest, state.url.as_bytes(), &state.url)),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn fetch_upgrade(State(state): State<Arc<ServerState>>, UrlPath(commitment): UrlPath<String>) -> Response {
    if let Some(failure) = state.begin() {
        return failure;
    }
    let commitment = match hex::decode(commitment) {
        Ok(commitment) => commitment,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match state.options.anchor_height {
        Some(height) => proof_response(&upgrade_response(&commitment, height)),
        None => (StatusCode::NOT_FOUND, "Pending confirmation in Bitcoin blockchain").into_response(),
    }
}

async fn block_hash(State(state): State<Arc<ServerState>>, UrlPath(height): UrlPath<u32>) -> Response {
    if let Some(failure) = state.begin() {
        return failure;
    }
    let body = state
        .options
        .block_hash_body
        .clone()
        .unwrap_or_else(|| format!("{:064x}", height));
    (StatusCode::OK, body).into_response()
}

/// Echo the request's 32-byte imprint back in a granted token
async fn issue_token(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    if let Some(failure) = state.begin() {
        return failure;
    }
    let imprint = body
        .windows(2)
        .position(|w| w == [0x04, 0x20])
        .and_then(|at| body.get(at + 2..at + 34));
    match imprint {
        Some(imprint) => (StatusCode::OK, TokenFixture::new(imprint.to_vec()).build()).into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// A calendar, block hash API and timestamp authority on one local port
///
/// Binds to a random port on localhost. Pending attestations it issues
/// point back at the server itself.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(TestServerOptions::default()).await
    }

    pub async fn start_with(options: TestServerOptions) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let state = Arc::new(ServerState {
            url: format!("http://{}", addr),
            options,
            requests: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/digest", post(submit_digest))
            .route("/timestamp/:commitment", get(fetch_upgrade))
            .route("/block-height/:height", get(block_hash))
            .route("/tsr", post(issue_token))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Test server failed");
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL, also the calendar endpoint
    pub fn url(&self) -> String {
        self.state.url.clone()
    }

    pub fn block_hash_api(&self) -> String {
        format!("{}/block-height/{{height}}", self.state.url)
    }

    pub fn tsa_url(&self) -> String {
        format!("{}/tsr", self.state.url)
    }

    /// Requests served so far, across all routes
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
