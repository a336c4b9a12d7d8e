//! The proof tree
//!
//! A `Timestamp` node holds a message, the attestations made directly on that
//! message, and one child per operation applied to it. Children are keyed in
//! an ordered map and attestations kept in an ordered set, so two trees that
//! describe the same paths have exactly one representation and merging is a
//! plain union.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use ets_types::{AttestationSummary, Chain};
use thiserror::Error;
use tracing::warn;

use crate::attestation::Attestation;
use crate::op::{Op, OpError};
use crate::ser::{DeserializeError, Reader, MAX_DEPTH};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("cannot merge timestamps for different messages: {expected} != {actual}")]
    MessageMismatch { expected: String, actual: String },

    #[error("timestamp node for {0} has neither attestations nor operations")]
    EmptyTimestamp(String),

    #[error("file digest is {actual} bytes but {alg} needs {expected}")]
    DigestLength {
        alg: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0} cannot be used as the file hash of a detached proof")]
    UnsupportedFileHash(&'static str),

    #[error(transparent)]
    Op(#[from] OpError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    msg: Vec<u8>,
    attestations: BTreeSet<Attestation>,
    ops: BTreeMap<Op, Timestamp>,
}

impl Timestamp {
    pub fn new(msg: impl Into<Vec<u8>>) -> Self {
        Self {
            msg: msg.into(),
            attestations: BTreeSet::new(),
            ops: BTreeMap::new(),
        }
    }

    pub fn msg(&self) -> &[u8] {
        &self.msg
    }

    pub fn attestations(&self) -> &BTreeSet<Attestation> {
        &self.attestations
    }

    pub fn ops(&self) -> &BTreeMap<Op, Timestamp> {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.attestations.is_empty() && self.ops.is_empty()
    }

    pub fn add_attestation(&mut self, attestation: Attestation) -> bool {
        self.attestations.insert(attestation)
    }

    /// Return the child for `op`, creating it if absent
    pub fn add_op(&mut self, op: Op) -> Result<&mut Timestamp, OpError> {
        let child = match self.ops.entry(op) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let msg = entry.key().apply(&self.msg)?;
                entry.insert(Timestamp::new(msg))
            }
        };
        Ok(child)
    }

    /// Union `other` into this tree
    ///
    /// Both trees must commit to the same message; on mismatch the receiver
    /// is left untouched.
    pub fn merge(&mut self, other: &Timestamp) -> Result<(), ProofError> {
        if self.msg != other.msg {
            return Err(ProofError::MessageMismatch {
                expected: hex::encode(&self.msg),
                actual: hex::encode(&other.msg),
            });
        }
        self.merge_unchecked(other);
        Ok(())
    }

    /// Returns whether any attestation or operation was inserted
    fn merge_unchecked(&mut self, other: &Timestamp) -> bool {
        let mut changed = false;
        let mut stack: Vec<(&mut Timestamp, &Timestamp)> = vec![(self, other)];
        while let Some((dst, src)) = stack.pop() {
            for attestation in &src.attestations {
                changed |= dst.attestations.insert(attestation.clone());
            }

            let mut fresh = Vec::new();
            for (op, child) in &src.ops {
                if !dst.ops.contains_key(op) {
                    dst.ops.insert(op.clone(), child.clone());
                    fresh.push(op);
                    changed = true;
                }
            }
            for (op, dst_child) in dst.ops.iter_mut() {
                if fresh.contains(&op) {
                    continue;
                }
                if let Some(src_child) = src.ops.get(op) {
                    stack.push((dst_child, src_child));
                }
            }
        }
        changed
    }

    /// Merge `other` into every node whose message equals `msg`
    ///
    /// Returns the number of nodes the sub-proof added anything to, so a
    /// sub-proof already present counts as zero.
    pub fn merge_at(&mut self, msg: &[u8], other: &Timestamp) -> usize {
        if other.msg != msg {
            return 0;
        }
        let mut merged = 0;
        let mut stack: Vec<(&mut Timestamp, usize)> = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            if node.msg == msg {
                if node.merge_unchecked(other) {
                    merged += 1;
                }
                continue;
            }
            if depth >= MAX_DEPTH {
                continue;
            }
            stack.extend(node.ops.values_mut().map(|child| (child, depth + 1)));
        }
        merged
    }

    /// Remove `attestation` from every node whose message equals `msg`
    pub fn remove_attestation(&mut self, msg: &[u8], attestation: &Attestation) -> usize {
        let mut removed = 0;
        let mut stack: Vec<(&mut Timestamp, usize)> = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            if node.msg == msg && node.attestations.remove(attestation) {
                removed += 1;
            }
            if depth < MAX_DEPTH {
                stack.extend(node.ops.values_mut().map(|child| (child, depth + 1)));
            }
        }
        removed
    }

    /// Pre-order walk of the tree, bounded to `MAX_DEPTH` levels
    pub fn nodes(&self) -> Vec<&Timestamp> {
        let mut out = Vec::new();
        let mut truncated = false;
        let mut stack = vec![(self, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            out.push(node);
            if depth >= MAX_DEPTH {
                truncated |= !node.ops.is_empty();
                continue;
            }
            stack.extend(node.ops.values().rev().map(|child| (child, depth + 1)));
        }
        if truncated {
            warn!(max_depth = MAX_DEPTH, "proof tree traversal truncated");
        }
        out
    }

    /// Every `(msg, attestation)` pair in the tree, each reported once
    pub fn all_attestations(&self) -> Vec<(&[u8], &Attestation)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for node in self.nodes() {
            for attestation in &node.attestations {
                if seen.insert((node.msg.as_slice(), attestation)) {
                    out.push((node.msg.as_slice(), attestation));
                }
            }
        }
        out
    }

    /// Pending calendar witnesses as `(commitment, calendar uri)`
    pub fn pending_witnesses(&self) -> Vec<(Vec<u8>, String)> {
        self.all_attestations()
            .into_iter()
            .filter_map(|(msg, attestation)| match attestation {
                Attestation::Pending { uri } => Some((msg.to_vec(), uri.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn blockchain_anchors(&self) -> Vec<(Chain, u32)> {
        self.all_attestations()
            .into_iter()
            .filter_map(|(_, attestation)| attestation.anchor())
            .collect()
    }

    pub fn has_anchor(&self) -> bool {
        self.all_attestations()
            .iter()
            .any(|(_, attestation)| attestation.anchor().is_some())
    }

    pub fn summary(&self) -> AttestationSummary {
        let mut summary = AttestationSummary::default();
        for (_, attestation) in self.all_attestations() {
            summary.attestations += 1;
            summary
                .attestation_types
                .push(attestation.kind_name().to_string());
            summary.has_blockchain_proof |= attestation.anchor().is_some();
            summary.has_pending_attestations |= attestation.is_pending();
        }
        summary
    }

    /// Serialize the tree without a header
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), ProofError> {
        if self.is_empty() {
            return Err(ProofError::EmptyTimestamp(hex::encode(&self.msg)));
        }
        let total = self.attestations.len() + self.ops.len();
        let mut index = 0;
        for attestation in &self.attestations {
            index += 1;
            if index < total {
                out.push(0xff);
            }
            out.push(0x00);
            attestation.encode(out);
        }
        for (op, child) in &self.ops {
            index += 1;
            if index < total {
                out.push(0xff);
            }
            op.encode(out);
            child.encode(out)?;
        }
        Ok(())
    }

    /// Read a tree committing to `msg`
    pub fn decode(reader: &mut Reader<'_>, msg: Vec<u8>, depth: usize) -> Result<Self, DeserializeError> {
        if depth > MAX_DEPTH {
            return Err(DeserializeError::DepthExceeded(MAX_DEPTH));
        }
        let mut node = Timestamp::new(msg);
        loop {
            let mut tag = reader.read_byte()?;
            let more = tag == 0xff;
            if more {
                tag = reader.read_byte()?;
            }
            if tag == 0x00 {
                node.attestations.insert(Attestation::decode(reader)?);
            } else {
                let op = Op::decode(tag, reader)?;
                let child_msg = op.apply(&node.msg)?;
                let child = Timestamp::decode(reader, child_msg, depth + 1)?;
                match node.ops.entry(op) {
                    Entry::Occupied(mut entry) => {
                        entry.get_mut().merge_unchecked(&child);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(child);
                    }
                }
            }
            if !more {
                return Ok(node);
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProofError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Parse a bare (headerless) timestamp as served by calendars
    pub fn from_bytes(msg: impl Into<Vec<u8>>, bytes: &[u8]) -> Result<Self, DeserializeError> {
        let mut reader = Reader::new(bytes);
        let timestamp = Timestamp::decode(&mut reader, msg.into(), 0)?;
        reader.finish()?;
        Ok(timestamp)
    }
}
