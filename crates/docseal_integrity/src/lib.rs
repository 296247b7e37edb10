use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

pub const TOKEN_BYTES: usize = 32;
pub const CONTENT_HASH_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntegrityToken(String);

impl IntegrityToken {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.trim().as_bytes()).into()
    }
}

impl std::fmt::Display for IntegrityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    // Accepts any-case hex of the right length; stored lowercase.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() != CONTENT_HASH_HEX_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn content_hash(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentHash(hex::encode(hasher.finalize()))
}

pub trait TokenSource: Send + Sync {
    fn mint(&self) -> IntegrityToken;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenSource;

impl TokenSource for RandomTokenSource {
    fn mint(&self) -> IntegrityToken {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; TOKEN_BYTES];
        rng.fill_bytes(&mut bytes);
        IntegrityToken::from_bytes(&bytes)
    }
}

// Hands out the same token every time. Only for reproducible output.
#[derive(Debug, Clone)]
pub struct FixedTokenSource(pub IntegrityToken);

impl TokenSource for FixedTokenSource {
    fn mint(&self) -> IntegrityToken {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityRecord {
    pub document_id: String,
    pub integrity_token: IntegrityToken,
    pub content_hash: ContentHash,
    pub finalized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMatch {
    pub document_id: String,
    // False when the hash belongs to a superseded assembly.
    pub current: bool,
}

// Persistence seam for finalized records. A new record for a document replaces
// the current one; previously issued hashes stay resolvable.
pub trait IntegrityStore {
    fn current(&self, document_id: &str) -> Option<IntegrityRecord>;
    fn find_by_hash(&self, hash: &ContentHash) -> Option<HashMatch>;
    fn record(&mut self, record: IntegrityRecord);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryIntegrityStore {
    current: BTreeMap<String, IntegrityRecord>,
    issued: Vec<IntegrityRecord>,
}

impl MemoryIntegrityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> &[IntegrityRecord] {
        &self.issued
    }
}

impl IntegrityStore for MemoryIntegrityStore {
    fn current(&self, document_id: &str) -> Option<IntegrityRecord> {
        self.current.get(document_id).cloned()
    }

    fn find_by_hash(&self, hash: &ContentHash) -> Option<HashMatch> {
        let issued = self.issued.iter().rev().find(|r| &r.content_hash == hash)?;
        let current = self
            .current
            .get(&issued.document_id)
            .is_some_and(|r| &r.content_hash == hash);
        Some(HashMatch {
            document_id: issued.document_id.clone(),
            current,
        })
    }

    fn record(&mut self, record: IntegrityRecord) {
        self.issued.push(record.clone());
        self.current.insert(record.document_id.clone(), record);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerdict {
    Verified,
    Stale,
    NotFound,
}

pub fn verify_by_token<S: IntegrityStore + ?Sized>(
    store: &S,
    document_id: &str,
    presented_token: &str,
) -> TokenVerdict {
    match store.current(document_id) {
        None => TokenVerdict::NotFound,
        Some(record) if record.integrity_token.matches(presented_token) => TokenVerdict::Verified,
        Some(_) => TokenVerdict::Stale,
    }
}

pub fn verify_by_hash<S: IntegrityStore + ?Sized>(
    store: &S,
    presented_hash: &str,
) -> Option<HashMatch> {
    let hash = ContentHash::parse(presented_hash)?;
    store.find_by_hash(&hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    // Bytes were issued for this document but the token is no longer current.
    TokenMismatch,
    // Bytes were never issued for this document.
    HashMismatch,
    NotFound,
}

impl Verification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verification::Verified => "VERIFIED",
            Verification::TokenMismatch => "INTEGRITY_TOKEN_MISMATCH",
            Verification::HashMismatch => "CONTENT_HASH_MISMATCH",
            Verification::NotFound => "NOT_FOUND",
        }
    }
}

pub fn verify_presented<S: IntegrityStore + ?Sized>(
    store: &S,
    document_id: &str,
    presented_token: &str,
    presented_bytes: &[u8],
) -> Verification {
    let Some(current) = store.current(document_id) else {
        return Verification::NotFound;
    };
    let hash = content_hash(presented_bytes);
    if hash == current.content_hash {
        return if current.integrity_token.matches(presented_token) {
            Verification::Verified
        } else {
            Verification::TokenMismatch
        };
    }
    match store.find_by_hash(&hash) {
        Some(found) if found.document_id == document_id => Verification::TokenMismatch,
        _ => Verification::HashMismatch,
    }
}
