mod annotation;
mod audit;
mod canvas;
mod certificate;
mod compose;
mod error;
mod pdf;
mod perf;
mod render;
mod source;
mod transform;
mod types;

pub use annotation::{
    Annotation, AnnotationIndex, AnnotationKind, DEFAULT_FONT_SIZE, DEFAULT_STROKE_WIDTH,
    ImageFormat, PathPoint, RawAnnotation, Style, decode_image_payload, ingest_annotations,
};
pub use audit::{AuditAction, AuditEntry, sort_for_certificate, sort_for_live_view};
pub use canvas::{Canvas, Command, StrokeStyle};
pub use certificate::{
    CertificateSpec, CertificateSummary, DEFAULT_CAPTIONS, QrMatrix, VerificationSpec,
    apply_verification_footer, build_certificate_page, verification_url,
};
pub use compose::{ComposeOutcome, PlacedPage, Rotation, VirtualPage, compose_pages};
pub use docseal_integrity::{
    ContentHash, FixedTokenSource, HashMatch, IntegrityRecord, IntegrityStore, IntegrityToken,
    MemoryIntegrityStore, RandomTokenSource, TokenSource, TokenVerdict, Verification,
    content_hash, verify_by_hash, verify_by_token, verify_presented,
};
pub use error::{AssemblyError, AssemblyWarning, Stage, WarningCode};
pub use pdf::{
    AlphaData, CopiedPage, ImageData, ImageDecodeError, OutputDocument, PdfError,
    decode_image_bytes, render_commands,
};
pub use perf::PerfLogger;
pub use render::render_annotation;
pub use source::{
    DocumentLocation, ImportedSource, MemorySourceResolver, SourceCache, SourceError,
    SourceResolver, SourceTimings,
};
pub use transform::{from_drawing_space, local_point_to_drawing_space, to_drawing_space};
pub use types::{Color, DrawingRect, Geometry, Paint, Pt, Size};

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System,
    // Pinned timestamp for reproducible output.
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(ts) => *ts,
        }
    }
}

pub struct Assembler {
    verification: VerificationSpec,
    certificate: CertificateSpec,
    token_source: Arc<dyn TokenSource>,
    clock: Clock,
    perf: Option<PerfLogger>,
}

pub struct AssemblerBuilder {
    verification: VerificationSpec,
    certificate: CertificateSpec,
    token_source: Arc<dyn TokenSource>,
    clock: Clock,
    perf_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblySummary {
    pub content_pages: usize,
    pub skipped_pages: usize,
    pub annotations_drawn: usize,
    pub source_fetches: usize,
    pub certificate: CertificateSummary,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub output_bytes: Vec<u8>,
    pub record: IntegrityRecord,
    pub verification_url: String,
    pub warnings: Vec<AssemblyWarning>,
    pub summary: AssemblySummary,
}

impl Assembly {
    pub fn integrity_token(&self) -> &IntegrityToken {
        &self.record.integrity_token
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.record.content_hash
    }

    // Replaces the document's current record; earlier hashes stay resolvable.
    pub fn persist<S: IntegrityStore + ?Sized>(&self, store: &mut S) {
        store.record(self.record.clone());
    }
}

#[derive(Debug, Default)]
struct StageTimings {
    compose: Duration,
    render: Duration,
    serialize: Duration,
    hash: Duration,
}

impl Default for AssemblerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AssemblerBuilder {
    pub fn new() -> Self {
        Self {
            verification: VerificationSpec::default(),
            certificate: CertificateSpec::default(),
            token_source: Arc::new(RandomTokenSource),
            clock: Clock::System,
            perf_path: None,
        }
    }

    pub fn verification_base_url(mut self, url: impl Into<String>) -> Self {
        self.verification.base_url = url.into();
        self
    }

    pub fn footer_captions<S: Into<String>>(mut self, captions: [S; 3]) -> Self {
        self.verification.captions = captions.map(Into::into);
        self
    }

    pub fn certificate_title(mut self, title: impl Into<String>) -> Self {
        self.certificate.title = title.into();
        self
    }

    pub fn certificate_page_size(mut self, size: Size) -> Self {
        self.certificate.page_size = size;
        self
    }

    pub fn max_audit_rows(mut self, rows: usize) -> Self {
        self.certificate.max_audit_rows = rows;
        self
    }

    // Stage timings as JSONL; a `_hot.log` summary is written beside it.
    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn token_source(mut self, source: impl TokenSource + 'static) -> Self {
        self.token_source = Arc::new(source);
        self
    }

    pub fn fixed_time(mut self, ts: DateTime<Utc>) -> Self {
        self.clock = Clock::Fixed(ts);
        self
    }

    pub fn build(self) -> Result<Assembler, AssemblyError> {
        if self.verification.base_url.trim().is_empty() {
            return Err(AssemblyError::InvalidConfiguration(
                "verification_base_url must not be empty".to_string(),
            ));
        }
        if self.certificate.max_audit_rows == 0 {
            return Err(AssemblyError::InvalidConfiguration(
                "max_audit_rows must be > 0".to_string(),
            ));
        }
        let size = self.certificate.page_size;
        if size.width <= Pt::ZERO || size.height <= Pt::ZERO {
            return Err(AssemblyError::InvalidConfiguration(
                "certificate_page_size must be positive".to_string(),
            ));
        }
        let perf = match &self.perf_path {
            Some(path) => Some(PerfLogger::new(path).map_err(|err| {
                AssemblyError::InvalidConfiguration(format!(
                    "perf log {}: {}",
                    path.display(),
                    err
                ))
            })?),
            None => None,
        };
        Ok(Assembler {
            verification: self.verification,
            certificate: self.certificate,
            token_source: self.token_source,
            clock: self.clock,
            perf,
        })
    }
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl Assembler {
    pub fn builder() -> AssemblerBuilder {
        AssemblerBuilder::new()
    }

    pub fn verification_spec(&self) -> &VerificationSpec {
        &self.verification
    }

    pub fn certificate_spec(&self) -> &CertificateSpec {
        &self.certificate
    }

    // Same as `assemble`, starting from stored annotation rows. Rows that fail
    // ingestion are reported ahead of the assembly warnings.
    pub fn assemble_raw<R: SourceResolver + ?Sized>(
        &self,
        resolver: &R,
        primary_document_id: &str,
        virtual_pages: &[VirtualPage],
        raw_annotations: &[RawAnnotation],
        audit_entries: &[AuditEntry],
    ) -> Result<Assembly, AssemblyError> {
        let (annotations, mut warnings) = ingest_annotations(raw_annotations);
        let mut assembly = self.assemble(
            resolver,
            primary_document_id,
            virtual_pages,
            &annotations,
            audit_entries,
        )?;
        warnings.append(&mut assembly.warnings);
        assembly.warnings = warnings;
        Ok(assembly)
    }

    // fetch -> parse -> compose -> render -> serialize -> hash. The token is
    // minted before the footer and certificate so both can carry it.
    pub fn assemble<R: SourceResolver + ?Sized>(
        &self,
        resolver: &R,
        primary_document_id: &str,
        virtual_pages: &[VirtualPage],
        annotations: &[Annotation],
        audit_entries: &[AuditEntry],
    ) -> Result<Assembly, AssemblyError> {
        if virtual_pages.is_empty() {
            return Err(AssemblyError::NoPages);
        }
        resolver
            .locate(primary_document_id)
            .map_err(|err| AssemblyError::PrimaryUnresolved {
                document_id: primary_document_id.to_string(),
                message: err.to_string(),
            })?;

        let token = self.token_source.mint();
        let generated_at = self.clock.now();
        let url = verification_url(&self.verification.base_url, primary_document_id, &token);
        let mut timings = StageTimings::default();

        let t_compose = Instant::now();
        let mut output = OutputDocument::new();
        let mut cache = SourceCache::new(resolver);
        let index = AnnotationIndex::new(annotations);
        let outcome = compose_pages(&mut output, &mut cache, virtual_pages, &index);
        let sources = cache.timings();
        timings.compose = t_compose
            .elapsed()
            .saturating_sub(sources.fetch + sources.parse);
        log::debug!(
            "composed {} of {} pages for {} ({} warnings)",
            outcome.pages.len(),
            virtual_pages.len(),
            primary_document_id,
            outcome.warnings.len()
        );

        let t_render = Instant::now();
        if let Some(last) = outcome.pages.last() {
            apply_verification_footer(
                &mut output,
                last.page_id,
                last.size,
                &self.verification,
                &url,
            )?;
        }
        let certificate = build_certificate_page(
            &mut output,
            &self.certificate,
            primary_document_id,
            &generated_at,
            &url,
            audit_entries,
        )?;
        timings.render = t_render.elapsed();

        let t_serialize = Instant::now();
        let output_bytes = output
            .finish(&generated_at)
            .map_err(|err| AssemblyError::Serialize(err.to_string()))?;
        timings.serialize = t_serialize.elapsed();

        let t_hash = Instant::now();
        let hash = content_hash(&output_bytes);
        timings.hash = t_hash.elapsed();
        log::debug!(
            "sealed {}: {} bytes, sha256 {}",
            primary_document_id,
            output_bytes.len(),
            hash
        );

        let summary = AssemblySummary {
            content_pages: outcome.pages.len(),
            skipped_pages: virtual_pages.len() - outcome.pages.len(),
            annotations_drawn: outcome.annotations_drawn(),
            source_fetches: cache.fetch_count(),
            certificate,
        };
        if let Some(perf) = &self.perf {
            let doc = Some(primary_document_id);
            perf.log_span_ms(Stage::Fetch, doc, ms(sources.fetch));
            perf.log_span_ms(Stage::Parse, doc, ms(sources.parse));
            perf.log_span_ms(Stage::Compose, doc, ms(timings.compose));
            perf.log_span_ms(Stage::Render, doc, ms(timings.render));
            perf.log_span_ms(Stage::Serialize, doc, ms(timings.serialize));
            perf.log_span_ms(Stage::Hash, doc, ms(timings.hash));
            perf.log_counts(
                "assembly",
                doc,
                &[
                    ("pages", summary.content_pages as u64),
                    ("skipped", summary.skipped_pages as u64),
                    ("annotations", summary.annotations_drawn as u64),
                    ("fetches", summary.source_fetches as u64),
                    ("audit_rows", summary.certificate.rows_rendered as u64),
                    ("warnings", outcome.warnings.len() as u64),
                    ("bytes", output_bytes.len() as u64),
                ],
            );
            perf.flush();
        }

        Ok(Assembly {
            record: IntegrityRecord {
                document_id: primary_document_id.to_string(),
                integrity_token: token,
                content_hash: hash,
                finalized_at: generated_at,
            },
            output_bytes,
            verification_url: url,
            warnings: outcome.warnings,
            summary,
        })
    }
}
