//! Attestation resolution
//!
//! Pending calendar witnesses are upgraded by asking their calendar for the
//! rest of the proof. Blockchain anchors are resolved to a block hash through
//! a read-only lookup API and linked to a block explorer. Lookups are cached
//! per resolution pass so that repeated anchors cost one request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ets_core::{Attestation, Timestamp};
use ets_types::{AttestationSummary, BlockchainProof, CalendarResult, Chain, OtsReport};
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::calendar::CalendarTransport;
use crate::client::{http_client, read_body};
use crate::{ClientError, Result};

/// Resolves a block height to the block's hash
#[async_trait]
pub trait BlockHashLookup: Send + Sync {
    async fn block_hash(&self, chain: Chain, height: u32) -> Result<String>;
}

/// Block hash lookup over a templated HTTP API (`{height}` placeholder)
pub struct HttpBlockHashLookup {
    http: reqwest::Client,
    apis: HashMap<Chain, String>,
}

impl HttpBlockHashLookup {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout, HeaderMap::new())?,
            apis: HashMap::new(),
        })
    }

    /// Set the API template for a chain. An empty template disables lookups.
    pub fn with_api(mut self, chain: Chain, template: impl Into<String>) -> Self {
        self.apis.insert(chain, template.into());
        self
    }
}

#[async_trait]
impl BlockHashLookup for HttpBlockHashLookup {
    async fn block_hash(&self, chain: Chain, height: u32) -> Result<String> {
        let template = self
            .apis
            .get(&chain)
            .ok_or_else(|| ClientError::LookupApi("unsupported chain".to_string()))?;
        if template.is_empty() {
            return Err(ClientError::LookupApi("block hash api disabled".to_string()));
        }
        let url = template.replace("{height}", &height.to_string());
        debug!(%chain, height, %url, "looking up block hash");

        let response = self.http.get(&url).send().await?;
        let body = read_body(response).await?;
        parse_block_hash_response(&String::from_utf8_lossy(&body))
    }
}

/// Accepts a plain-text hash, `{"data": {"hash": ..}}` or `{"hash": ..}`
pub fn parse_block_hash_response(body: &str) -> Result<String> {
    let text = body.trim();
    if text.is_empty() {
        return Err(ClientError::LookupApi("empty api response".to_string()));
    }
    if !text.starts_with('{') {
        return Ok(text.to_string());
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ClientError::LookupApi(format!("invalid api response: {}", e)))?;
    let non_empty = |v: &serde_json::Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);
    value
        .get("data")
        .and_then(|data| data.get("hash"))
        .and_then(non_empty)
        .or_else(|| value.get("hash").and_then(non_empty))
        .ok_or_else(|| ClientError::LookupApi("unexpected api response".to_string()))
}

/// Explorer link templates for one chain
#[derive(Debug, Clone, Default)]
pub struct ExplorerTemplates {
    /// Template with a `{hash}` placeholder
    pub block_url: Option<String>,
    /// Template with a `{height}` placeholder
    pub height_url: Option<String>,
}

impl ExplorerTemplates {
    pub fn new(block_url: impl Into<String>, height_url: impl Into<String>) -> Self {
        let non_empty = |s: String| (!s.is_empty()).then_some(s);
        Self {
            block_url: non_empty(block_url.into()),
            height_url: non_empty(height_url.into()),
        }
    }

    /// Prefer the block template when the hash is known
    pub fn build_url(&self, height: u32, block_hash: Option<&str>) -> Option<String> {
        let fill = |template: &str| {
            template
                .replace("{hash}", block_hash.unwrap_or(""))
                .replace("{height}", &height.to_string())
        };
        match (block_hash, &self.block_url, &self.height_url) {
            (Some(_), Some(block), _) => Some(fill(block)),
            (_, _, Some(by_height)) => Some(fill(by_height)),
            _ => None,
        }
    }
}

/// Everything learned about a proof tree in one resolution pass
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub summary: AttestationSummary,
    pub blockchain_proofs: Vec<BlockchainProof>,
    pub calendar_results: Vec<CalendarResult>,
    pub upgrade_errors: Vec<String>,
    /// The tree changed and must be re-persisted
    pub updated: bool,
}

impl ResolutionReport {
    pub fn into_ots_report(self, hash_match: Option<bool>) -> OtsReport {
        OtsReport {
            summary: self.summary,
            blockchain_proofs: self.blockchain_proofs,
            upgrade_errors: self.upgrade_errors,
            calendar_results: self.calendar_results,
            hash_match,
        }
    }
}

pub struct AttestationResolver {
    calendar: Arc<dyn CalendarTransport>,
    lookup: Arc<dyn BlockHashLookup>,
    explorers: HashMap<Chain, ExplorerTemplates>,
}

impl AttestationResolver {
    pub fn new(calendar: Arc<dyn CalendarTransport>, lookup: Arc<dyn BlockHashLookup>) -> Self {
        Self {
            calendar,
            lookup,
            explorers: HashMap::new(),
        }
    }

    pub fn with_explorer(mut self, chain: Chain, templates: ExplorerTemplates) -> Self {
        self.explorers.insert(chain, templates);
        self
    }

    /// Upgrade every pending witness, then resolve every anchor
    pub async fn resolve(&self, tree: &mut Timestamp) -> ResolutionReport {
        let (calendar_results, upgrade_errors, updated) = self.upgrade_pending(tree).await;
        ResolutionReport {
            summary: tree.summary(),
            blockchain_proofs: self.resolve_anchors(tree).await,
            calendar_results,
            upgrade_errors,
            updated,
        }
    }

    /// Ask each pending witness's calendar for its sub-proof and merge it in
    ///
    /// A witness whose sub-proof reaches a blockchain anchor is dropped from
    /// its node.
    pub async fn upgrade_pending(&self, tree: &mut Timestamp) -> (Vec<CalendarResult>, Vec<String>, bool) {
        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut updated = false;

        for (commitment, uri) in tree.pending_witnesses() {
            match self.calendar.fetch_upgrade(&uri, &commitment).await {
                Ok(sub_proof) => {
                    let merged = tree.merge_at(&commitment, &sub_proof);
                    let mut removed = 0;
                    if sub_proof.has_anchor() {
                        let pending = Attestation::Pending { uri: uri.clone() };
                        removed = tree.remove_attestation(&commitment, &pending);
                    }
                    updated |= merged > 0 || removed > 0;
                    debug!(%uri, nodes = merged, "merged calendar upgrade");
                    results.push(CalendarResult {
                        uri,
                        success: true,
                        summary: Some(sub_proof.summary()),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(%uri, error = %e, "calendar upgrade failed");
                    errors.push(format!("{}: {}", uri, e));
                    results.push(CalendarResult {
                        uri,
                        success: false,
                        summary: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        (results, errors, updated)
    }

    /// Resolve each distinct `(chain, height)` anchor once
    pub async fn resolve_anchors(&self, tree: &Timestamp) -> Vec<BlockchainProof> {
        let mut cache: HashMap<(Chain, u32), std::result::Result<String, String>> = HashMap::new();
        let mut proofs = Vec::new();

        for (chain, height) in tree.blockchain_anchors() {
            if cache.contains_key(&(chain, height)) {
                debug!(%chain, height, "block hash cache hit");
                continue;
            }
            let lookup = self
                .lookup
                .block_hash(chain, height)
                .await
                .map_err(|e| e.to_string());
            if let Err(error) = &lookup {
                warn!(%chain, height, %error, "block hash lookup failed");
            }

            let block_hash = lookup.as_ref().ok().cloned();
            let explorer_url = self
                .explorers
                .get(&chain)
                .and_then(|templates| templates.build_url(height, block_hash.as_deref()));
            proofs.push(BlockchainProof {
                chain,
                height,
                block_hash,
                explorer_url,
                block_hash_error: lookup.as_ref().err().cloned(),
            });
            cache.insert((chain, height), lookup);
        }
        proofs
    }
}
