use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Compose,
    Render,
    Serialize,
    Hash,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Compose => "compose",
            Stage::Render => "render",
            Stage::Serialize => "serialize",
            Stage::Hash => "hash",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Fatal failures. Nothing is returned alongside these.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no virtual pages supplied")]
    NoPages,
    #[error("primary document {document_id} could not be resolved: {message}")]
    PrimaryUnresolved {
        document_id: String,
        message: String,
    },
    #[error("failed to draw {what}: {message}")]
    Render { what: String, message: String },
    #[error("failed to serialize output document: {0}")]
    Serialize(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AssemblyError {
    pub fn stage(&self) -> Stage {
        match self {
            AssemblyError::NoPages => Stage::Compose,
            AssemblyError::PrimaryUnresolved { .. } => Stage::Fetch,
            AssemblyError::Render { .. } => Stage::Render,
            AssemblyError::Serialize(_) => Stage::Serialize,
            AssemblyError::InvalidConfiguration(_) => Stage::Compose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    SourceUnavailable,
    SourceUnparseable,
    SourceEncrypted,
    SourceEmpty,
    PageOutOfRange,
    InvalidRotation,
    PageCopyFailed,
    ImageUndecodable,
    ImageUnsupported,
    AnnotationRejected,
    AnnotationLegacyImage,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::SourceUnavailable => "SOURCE_UNAVAILABLE",
            WarningCode::SourceUnparseable => "SOURCE_UNPARSEABLE",
            WarningCode::SourceEncrypted => "SOURCE_ENCRYPTED",
            WarningCode::SourceEmpty => "SOURCE_EMPTY",
            WarningCode::PageOutOfRange => "PAGE_OUT_OF_RANGE",
            WarningCode::InvalidRotation => "INVALID_ROTATION",
            WarningCode::PageCopyFailed => "PAGE_COPY_FAILED",
            WarningCode::ImageUndecodable => "IMAGE_UNDECODABLE",
            WarningCode::ImageUnsupported => "IMAGE_UNSUPPORTED",
            WarningCode::AnnotationRejected => "ANNOTATION_REJECTED",
            WarningCode::AnnotationLegacyImage => "ANNOTATION_LEGACY_IMAGE",
        }
    }
}

// A per-item problem: the item was skipped (or degraded) and assembly went on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyWarning {
    pub code: WarningCode,
    pub subject: String,
    pub message: String,
}

impl AssemblyWarning {
    pub fn new(code: WarningCode, subject: impl Into<String>, message: impl Into<String>) -> Self {
        let warning = Self {
            code,
            subject: subject.into(),
            message: message.into(),
        };
        log::warn!("{warning}");
        warning
    }
}

impl std::fmt::Display for AssemblyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.code.as_str(), self.subject, self.message)
    }
}
