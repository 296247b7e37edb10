use crate::annotation::AnnotationIndex;
use crate::canvas::Canvas;
use crate::error::{AssemblyWarning, WarningCode};
use crate::pdf::OutputDocument;
use crate::render::render_annotation;
use crate::source::{SourceCache, SourceResolver};
use crate::types::Size;
use lopdf::ObjectId as LoObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualPage {
    pub id: String,
    pub source_doc_id: String,
    // 1-based.
    pub source_page_index: u32,
    #[serde(default)]
    pub rotation_delta: i32,
}

impl VirtualPage {
    pub fn new(id: impl Into<String>, source_doc_id: impl Into<String>, page: u32) -> Self {
        Self {
            id: id.into(),
            source_doc_id: source_doc_id.into(),
            source_page_index: page,
            rotation_delta: 0,
        }
    }

    pub fn rotated(mut self, delta: i32) -> Self {
        self.rotation_delta = delta;
        self
    }
}

// Page rotation in quarter turns, always within 0..360.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rotation(u16);

impl Rotation {
    pub const NONE: Rotation = Rotation(0);

    pub fn from_degrees(degrees: i64) -> Option<Rotation> {
        if degrees % 90 != 0 {
            return None;
        }
        Some(Rotation(degrees.rem_euclid(360) as u16))
    }

    pub fn degrees(self) -> i64 {
        self.0 as i64
    }

    pub fn compose(self, other: Rotation) -> Rotation {
        Rotation((self.0 + other.0) % 360)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedPage {
    pub virtual_page_id: String,
    pub page_id: LoObjectId,
    pub size: Size,
    pub rotation: Rotation,
    pub annotations_drawn: usize,
}

#[derive(Debug, Default)]
pub struct ComposeOutcome {
    pub pages: Vec<PlacedPage>,
    pub warnings: Vec<AssemblyWarning>,
}

impl ComposeOutcome {
    pub fn annotations_drawn(&self) -> usize {
        self.pages.iter().map(|p| p.annotations_drawn).sum()
    }
}

// Builds output pages in virtual-page order. Every failure is scoped to the
// entry (or annotation) that caused it.
pub fn compose_pages<R: SourceResolver + ?Sized>(
    output: &mut OutputDocument,
    cache: &mut SourceCache<'_, R>,
    virtual_pages: &[VirtualPage],
    annotations: &AnnotationIndex<'_>,
) -> ComposeOutcome {
    virtual_pages
        .iter()
        .fold(ComposeOutcome::default(), |mut outcome, vp| {
            match place_page(output, cache, vp, annotations, &mut outcome.warnings) {
                Ok(placed) => outcome.pages.push(placed),
                Err(warning) => outcome.warnings.push(warning),
            }
            outcome
        })
}

fn place_page<R: SourceResolver + ?Sized>(
    output: &mut OutputDocument,
    cache: &mut SourceCache<'_, R>,
    vp: &VirtualPage,
    annotations: &AnnotationIndex<'_>,
    warnings: &mut Vec<AssemblyWarning>,
) -> Result<PlacedPage, AssemblyWarning> {
    let delta = Rotation::from_degrees(vp.rotation_delta as i64).ok_or_else(|| {
        AssemblyWarning::new(
            WarningCode::InvalidRotation,
            vp.id.as_str(),
            format!("rotation delta {} is not a multiple of 90", vp.rotation_delta),
        )
    })?;

    let source = cache.get(&vp.source_doc_id, output).map_err(|err| {
        AssemblyWarning::new(
            err.warning_code(),
            vp.id.as_str(),
            format!("source {}: {}", vp.source_doc_id, err),
        )
    })?;
    let page_count = source.page_count();
    let src_page = source.page(vp.source_page_index).ok_or_else(|| {
        AssemblyWarning::new(
            WarningCode::PageOutOfRange,
            vp.id.as_str(),
            format!(
                "page {} requested from {} which has {} pages",
                vp.source_page_index, vp.source_doc_id, page_count
            ),
        )
    })?;

    let copy_failed = |err: &dyn std::fmt::Display| {
        AssemblyWarning::new(WarningCode::PageCopyFailed, vp.id.as_str(), err.to_string())
    };
    let copied = output.copy_page(src_page).map_err(|err| copy_failed(&err))?;
    let prior = Rotation::from_degrees(copied.rotate).unwrap_or_else(|| {
        log::debug!(
            "page {} of {} carries non-quarter rotation {}; treating as 0",
            vp.source_page_index,
            vp.source_doc_id,
            copied.rotate
        );
        Rotation::NONE
    });
    let rotation = prior.compose(delta);
    output
        .set_rotation(copied.id, rotation.degrees())
        .map_err(|err| copy_failed(&err))?;

    let mut canvas = Canvas::new();
    let mut drawn = 0;
    for annotation in annotations.for_page(&vp.source_doc_id, vp.source_page_index) {
        match render_annotation(&mut canvas, copied.size.height, annotation) {
            Ok(()) => drawn += 1,
            Err(warning) => warnings.push(warning),
        }
    }
    output
        .attach(copied.id, &canvas)
        .map_err(|err| copy_failed(&err))?;
    output.push_page(copied.id);

    Ok(PlacedPage {
        virtual_page_id: vp.id.clone(),
        page_id: copied.id,
        size: copied.size,
        rotation,
        annotations_drawn: drawn,
    })
}
