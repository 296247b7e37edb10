use crate::error::{Stage, WarningCode};
use crate::pdf::OutputDocument;
use lopdf::{Document as LoDocument, ObjectId as LoObjectId};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DocumentLocation(pub String);

impl DocumentLocation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The two external collaborators behind a source document: a lookup from id to
// storage location, and a byte fetch for that location.
pub trait SourceResolver {
    fn locate(&self, document_id: &str) -> Result<DocumentLocation, SourceError>;
    fn fetch(&self, location: &DocumentLocation) -> Result<Vec<u8>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("document {0} has no known location")]
    NotFound(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("document is encrypted")]
    Encrypted,
    #[error("document has no pages")]
    Empty,
}

impl SourceError {
    pub fn warning_code(&self) -> WarningCode {
        match self {
            SourceError::NotFound(_) | SourceError::Fetch(_) => WarningCode::SourceUnavailable,
            SourceError::Parse(_) => WarningCode::SourceUnparseable,
            SourceError::Encrypted => WarningCode::SourceEncrypted,
            SourceError::Empty => WarningCode::SourceEmpty,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            SourceError::NotFound(_) | SourceError::Fetch(_) => Stage::Fetch,
            _ => Stage::Parse,
        }
    }
}

// Byte store keyed by document id. Counts fetches per document.
#[derive(Debug, Default)]
pub struct MemorySourceResolver {
    blobs: BTreeMap<String, Vec<u8>>,
    fetches: Mutex<BTreeMap<String, usize>>,
}

impl MemorySourceResolver {
    const SCHEME: &'static str = "memory://";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document_id: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.insert(document_id.into(), bytes);
    }

    pub fn with(mut self, document_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(document_id, bytes);
        self
    }

    pub fn fetch_count(&self, document_id: &str) -> usize {
        self.fetches
            .lock()
            .map(|counts| counts.get(document_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl SourceResolver for MemorySourceResolver {
    fn locate(&self, document_id: &str) -> Result<DocumentLocation, SourceError> {
        if self.blobs.contains_key(document_id) {
            Ok(DocumentLocation(format!("{}{}", Self::SCHEME, document_id)))
        } else {
            Err(SourceError::NotFound(document_id.to_string()))
        }
    }

    fn fetch(&self, location: &DocumentLocation) -> Result<Vec<u8>, SourceError> {
        let id = location
            .as_str()
            .strip_prefix(Self::SCHEME)
            .ok_or_else(|| SourceError::Fetch(format!("unsupported location {}", location.0)))?;
        let bytes = self
            .blobs
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::Fetch(format!("no bytes at {}", location.0)))?;
        if let Ok(mut counts) = self.fetches.lock() {
            *counts.entry(id.to_string()).or_insert(0) += 1;
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSource {
    pub document_id: String,
    // Imported page objects in page order; index 0 is page 1.
    pub page_ids: Vec<LoObjectId>,
}

impl ImportedSource {
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    pub fn page(&self, one_based: u32) -> Option<LoObjectId> {
        let idx = (one_based as usize).checked_sub(1)?;
        self.page_ids.get(idx).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceTimings {
    pub fetch: Duration,
    pub parse: Duration,
}

// Per-assembly memo of loaded sources. Failures are memoized too, so a broken
// source is attempted once no matter how many pages name it.
pub struct SourceCache<'r, R: SourceResolver + ?Sized> {
    resolver: &'r R,
    entries: BTreeMap<String, Result<ImportedSource, SourceError>>,
    fetches: usize,
    timings: SourceTimings,
}

impl<'r, R: SourceResolver + ?Sized> SourceCache<'r, R> {
    pub fn new(resolver: &'r R) -> Self {
        Self {
            resolver,
            entries: BTreeMap::new(),
            fetches: 0,
            timings: SourceTimings::default(),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    pub fn timings(&self) -> SourceTimings {
        self.timings
    }

    pub fn loaded_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_ok()).count()
    }

    pub fn get(
        &mut self,
        document_id: &str,
        output: &mut OutputDocument,
    ) -> Result<&ImportedSource, SourceError> {
        let entry = match self.entries.entry(document_id.to_string()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                self.fetches += 1;
                let loaded = load_source(self.resolver, document_id, output, &mut self.timings);
                if let Err(err) = &loaded {
                    log::debug!("source {} failed at {}: {}", document_id, err.stage(), err);
                }
                slot.insert(loaded)
            }
        };
        entry.as_ref().map_err(Clone::clone)
    }
}

fn load_source<R: SourceResolver + ?Sized>(
    resolver: &R,
    document_id: &str,
    output: &mut OutputDocument,
    timings: &mut SourceTimings,
) -> Result<ImportedSource, SourceError> {
    let started = Instant::now();
    let location = resolver.locate(document_id)?;
    let bytes = resolver.fetch(&location)?;
    timings.fetch += started.elapsed();
    log::debug!(
        "fetched {} ({} bytes) from {}",
        document_id,
        bytes.len(),
        location.as_str()
    );

    let started = Instant::now();
    let doc = LoDocument::load_mem(&bytes).map_err(|err| SourceError::Parse(err.to_string()))?;
    if doc.is_encrypted() {
        return Err(SourceError::Encrypted);
    }
    if doc.get_pages().is_empty() {
        return Err(SourceError::Empty);
    }
    let page_ids = output.import(doc);
    timings.parse += started.elapsed();

    Ok(ImportedSource {
        document_id: document_id.to_string(),
        page_ids,
    })
}
