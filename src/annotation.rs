use crate::error::{AssemblyWarning, WarningCode};
use crate::types::{Color, Geometry, Paint};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_STROKE_WIDTH: f32 = 1.0;
pub const DEFAULT_FONT_SIZE: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn sniff(data: &[u8]) -> Option<ImageFormat> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else {
            None
        }
    }

    pub fn from_mime(mime: &str) -> Option<ImageFormat> {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("png") {
            Some(ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub stroke: Paint,
    pub fill: Paint,
    pub stroke_width: f32,
    pub font_size: f32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: Paint::Solid(Color::BLACK),
            fill: Paint::None,
            stroke_width: DEFAULT_STROKE_WIDTH,
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PathPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationKind {
    Image {
        data: Vec<u8>,
        format_hint: Option<ImageFormat>,
    },
    Rect,
    Ellipse,
    Text {
        text: String,
    },
    // Points live in [0, original_width] x [0, original_height], top-left origin.
    FreehandPath {
        points: Vec<PathPoint>,
        original_width: f32,
        original_height: f32,
    },
}

impl AnnotationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnnotationKind::Image { .. } => "image",
            AnnotationKind::Rect => "rect",
            AnnotationKind::Ellipse => "ellipse",
            AnnotationKind::Text { .. } => "text",
            AnnotationKind::FreehandPath { .. } => "freehand",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: String,
    pub source_doc_id: String,
    // 1-based, anchored to the source page rather than a virtual page.
    pub source_page_index: u32,
    pub geometry: Geometry,
    pub style: Style,
    pub kind: AnnotationKind,
    pub created_at: DateTime<Utc>,
}

// Row shape handed over by the annotation store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnnotation {
    pub id: String,
    #[serde(alias = "sourceDocId")]
    pub document_id: String,
    #[serde(alias = "sourcePageIndex")]
    pub page_index: u32,
    pub kind: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub stroke_color: Option<String>,
    #[serde(default)]
    pub fill_color: Option<String>,
    #[serde(default)]
    pub stroke_width: Option<f32>,
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindTag {
    Image,
    Rect,
    Ellipse,
    Text,
    Freehand,
}

fn kind_tag(raw: &str) -> Option<KindTag> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "image" | "signature" | "initials" => Some(KindTag::Image),
        "rect" | "rectangle" => Some(KindTag::Rect),
        "ellipse" | "circle" => Some(KindTag::Ellipse),
        "text" => Some(KindTag::Text),
        "freehand" | "path" | "drawing" => Some(KindTag::Freehand),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShapePayload {
    #[serde(default)]
    stroke_color: Option<String>,
    #[serde(default)]
    fill_color: Option<String>,
    #[serde(default)]
    stroke_width: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreehandPayload {
    points: Vec<PathPoint>,
    #[serde(alias = "originalWidth")]
    width: f32,
    #[serde(alias = "originalHeight")]
    height: f32,
    #[serde(default)]
    stroke_color: Option<String>,
    #[serde(default)]
    stroke_width: Option<f32>,
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, data_part) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains("base64") {
        base64::engine::general_purpose::STANDARD
            .decode(data_part.trim())
            .ok()?
    } else {
        data_part.as_bytes().to_vec()
    };
    Some((mime, data))
}

// Data URI or bare base64.
pub fn decode_image_payload(payload: &str) -> Option<(Vec<u8>, Option<ImageFormat>)> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if let Some((mime, data)) = parse_data_uri(payload) {
        return Some((data, ImageFormat::from_mime(&mime)));
    }
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()?;
    Some((data, None))
}

fn base_style(raw: &RawAnnotation) -> Style {
    let mut style = Style::default();
    if let Some(stroke) = raw.stroke_color.as_deref() {
        style.stroke = Paint::parse(stroke);
    }
    if let Some(fill) = raw.fill_color.as_deref() {
        style.fill = Paint::parse(fill);
    }
    if let Some(width) = raw.stroke_width.filter(|w| w.is_finite() && *w >= 0.0) {
        style.stroke_width = width;
    }
    if let Some(size) = raw.font_size.filter(|s| s.is_finite() && *s > 0.0) {
        style.font_size = size;
    }
    style
}

fn legacy_image(raw: &RawAnnotation) -> Option<AnnotationKind> {
    let (data, format_hint) = decode_image_payload(&raw.payload)?;
    Some(AnnotationKind::Image { data, format_hint })
}

impl Annotation {
    // Normalizes one stored row. The optional warning reports a degraded but
    // accepted row; Err means the row was rejected.
    pub fn from_raw(
        raw: &RawAnnotation,
    ) -> Result<(Annotation, Option<AssemblyWarning>), AssemblyWarning> {
        let Some(tag) = kind_tag(&raw.kind) else {
            return Err(AssemblyWarning::new(
                WarningCode::AnnotationRejected,
                &raw.id,
                format!("unknown annotation kind: {:?}", raw.kind),
            ));
        };
        if raw.page_index == 0 {
            return Err(AssemblyWarning::new(
                WarningCode::AnnotationRejected,
                &raw.id,
                "page index is 1-based; got 0",
            ));
        }

        let mut style = base_style(raw);
        let mut notice = None;
        let kind = match tag {
            KindTag::Image => legacy_image(raw).ok_or_else(|| {
                AssemblyWarning::new(
                    WarningCode::AnnotationRejected,
                    &raw.id,
                    "image payload is neither a data URI nor base64",
                )
            })?,
            KindTag::Text => AnnotationKind::Text {
                text: raw.payload.clone(),
            },
            KindTag::Rect | KindTag::Ellipse | KindTag::Freehand => {
                match shape_kind(tag, &raw.payload, &mut style) {
                    Ok(kind) => kind,
                    Err(parse_err) => {
                        let kind = legacy_image(raw).ok_or_else(|| {
                            AssemblyWarning::new(
                                WarningCode::AnnotationRejected,
                                &raw.id,
                                format!("malformed shape payload: {parse_err}"),
                            )
                        })?;
                        notice = Some(AssemblyWarning::new(
                            WarningCode::AnnotationLegacyImage,
                            &raw.id,
                            format!("shape payload did not parse ({parse_err}); treated as image"),
                        ));
                        kind
                    }
                }
            }
        };

        Ok((
            Annotation {
                id: raw.id.clone(),
                source_doc_id: raw.document_id.clone(),
                source_page_index: raw.page_index,
                geometry: Geometry::new(raw.x, raw.y, raw.width, raw.height),
                style,
                kind,
                created_at: raw.created_at,
            },
            notice,
        ))
    }
}

fn shape_kind(
    tag: KindTag,
    payload: &str,
    style: &mut Style,
) -> Result<AnnotationKind, serde_json::Error> {
    if tag == KindTag::Freehand {
        let parsed: FreehandPayload = serde_json::from_str(payload)?;
        if let Some(stroke) = parsed.stroke_color.as_deref() {
            style.stroke = Paint::parse(stroke);
        }
        if let Some(width) = parsed.stroke_width.filter(|w| w.is_finite() && *w >= 0.0) {
            style.stroke_width = width;
        }
        return Ok(AnnotationKind::FreehandPath {
            points: parsed.points,
            original_width: parsed.width,
            original_height: parsed.height,
        });
    }

    // Plain shapes may carry no payload at all.
    let parsed: ShapePayload = if payload.trim().is_empty() {
        ShapePayload::default()
    } else {
        serde_json::from_str(payload)?
    };
    if let Some(stroke) = parsed.stroke_color.as_deref() {
        style.stroke = Paint::parse(stroke);
    }
    if let Some(fill) = parsed.fill_color.as_deref() {
        style.fill = Paint::parse(fill);
    }
    if let Some(width) = parsed.stroke_width.filter(|w| w.is_finite() && *w >= 0.0) {
        style.stroke_width = width;
    }
    Ok(if tag == KindTag::Rect {
        AnnotationKind::Rect
    } else {
        AnnotationKind::Ellipse
    })
}

pub fn ingest_annotations(raws: &[RawAnnotation]) -> (Vec<Annotation>, Vec<AssemblyWarning>) {
    raws.iter().fold(
        (Vec::with_capacity(raws.len()), Vec::new()),
        |(mut accepted, mut warnings), raw| {
            match Annotation::from_raw(raw) {
                Ok((annotation, notice)) => {
                    accepted.push(annotation);
                    warnings.extend(notice);
                }
                Err(warning) => warnings.push(warning),
            }
            (accepted, warnings)
        },
    )
}

// Annotations grouped by (source document, 1-based page), input order kept so
// later entries draw on top.
#[derive(Debug, Default)]
pub struct AnnotationIndex<'a> {
    by_source: BTreeMap<&'a str, BTreeMap<u32, Vec<&'a Annotation>>>,
}

impl<'a> AnnotationIndex<'a> {
    pub fn new(annotations: &'a [Annotation]) -> Self {
        let mut by_source: BTreeMap<&'a str, BTreeMap<u32, Vec<&'a Annotation>>> = BTreeMap::new();
        for annotation in annotations {
            by_source
                .entry(annotation.source_doc_id.as_str())
                .or_default()
                .entry(annotation.source_page_index)
                .or_default()
                .push(annotation);
        }
        Self { by_source }
    }

    pub fn for_page(&self, source_doc_id: &str, source_page_index: u32) -> &[&'a Annotation] {
        self.by_source
            .get(source_doc_id)
            .and_then(|pages| pages.get(&source_page_index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    fn raw(kind: &str, payload: &str) -> RawAnnotation {
        RawAnnotation {
            id: format!("ann-{kind}"),
            document_id: "doc-a".to_string(),
            page_index: 1,
            kind: kind.to_string(),
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
            stroke_color: None,
            fill_color: None,
            stroke_width: None,
            font_size: None,
            payload: payload.to_string(),
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("ts"),
        }
    }

    #[test]
    fn sniff_recognizes_jpeg_and_png_magic() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        let png = base64::engine::general_purpose::STANDARD
            .decode(PNG_1X1)
            .expect("png");
        assert_eq!(ImageFormat::sniff(&png), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
        assert_eq!(ImageFormat::sniff(&[]), None);
    }

    #[test]
    fn image_payload_accepts_data_uri_and_bare_base64() {
        let (data, hint) =
            decode_image_payload(&format!("data:image/png;base64,{PNG_1X1}")).expect("uri");
        assert_eq!(hint, Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(&data), Some(ImageFormat::Png));

        let (bare, hint) = decode_image_payload(PNG_1X1).expect("bare");
        assert_eq!(hint, None);
        assert_eq!(bare, data);

        assert!(decode_image_payload("%%% not base64 %%%").is_none());
        assert!(decode_image_payload("").is_none());
    }

    #[test]
    fn rect_payload_overrides_row_style() {
        let mut row = raw(
            "Rectangle",
            r##"{"strokeColor":"#ff0000","fillColor":"transparent","strokeWidth":3}"##,
        );
        row.fill_color = Some("#00ff00".to_string());
        let (ann, notice) = Annotation::from_raw(&row).expect("accepted");
        assert!(notice.is_none());
        assert_eq!(ann.kind, AnnotationKind::Rect);
        assert_eq!(ann.style.stroke, Paint::Solid(Color::rgb(1.0, 0.0, 0.0)));
        assert_eq!(ann.style.fill, Paint::None);
        assert_eq!(ann.style.stroke_width, 3.0);
    }

    #[test]
    fn shape_without_payload_uses_row_style() {
        let mut row = raw("circle", "");
        row.fill_color = Some("#0000ff".to_string());
        let (ann, _) = Annotation::from_raw(&row).expect("accepted");
        assert_eq!(ann.kind, AnnotationKind::Ellipse);
        assert_eq!(ann.style.fill, Paint::Solid(Color::rgb(0.0, 0.0, 1.0)));
        assert_eq!(ann.style.stroke, Paint::Solid(Color::BLACK));
    }

    #[test]
    fn malformed_shape_payload_falls_back_to_legacy_image() {
        let row = raw("rect", &format!("data:image/png;base64,{PNG_1X1}"));
        let (ann, notice) = Annotation::from_raw(&row).expect("accepted as image");
        assert!(matches!(ann.kind, AnnotationKind::Image { .. }));
        assert_eq!(
            notice.expect("notice").code,
            WarningCode::AnnotationLegacyImage
        );
    }

    #[test]
    fn malformed_shape_payload_without_image_is_rejected() {
        let row = raw("ellipse", "{not json");
        let err = Annotation::from_raw(&row).expect_err("rejected");
        assert_eq!(err.code, WarningCode::AnnotationRejected);
        assert!(err.message.contains("malformed shape payload"));
    }

    #[test]
    fn freehand_payload_parses_points_and_box() {
        let row = raw(
            "drawing",
            r##"{"points":[{"x":0,"y":0},{"x":50,"y":25}],"width":50,"height":25,"strokeColor":"#123456"}"##,
        );
        let (ann, _) = Annotation::from_raw(&row).expect("accepted");
        let AnnotationKind::FreehandPath {
            points,
            original_width,
            original_height,
        } = ann.kind
        else {
            panic!("expected freehand path");
        };
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], PathPoint { x: 50.0, y: 25.0 });
        assert_eq!((original_width, original_height), (50.0, 25.0));
        assert_eq!(ann.style.stroke, Color::from_hex("#123456").map(Paint::Solid).expect("c"));
    }

    #[test]
    fn unknown_kind_and_zero_page_are_rejected_during_ingestion() {
        let mut zero_page = raw("text", "hello");
        zero_page.page_index = 0;
        let rows = vec![
            raw("text", "hello"),
            raw("hologram", ""),
            zero_page,
            raw("signature", PNG_1X1),
        ];
        let (accepted, warnings) = ingest_annotations(&rows);
        assert_eq!(accepted.len(), 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.code == WarningCode::AnnotationRejected));
        assert_eq!(
            accepted[0].kind,
            AnnotationKind::Text {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn raw_annotation_deserializes_from_store_json() {
        let json = r##"{
            "id": "a1",
            "documentId": "doc-a",
            "pageIndex": 2,
            "kind": "rect",
            "x": 1, "y": 2, "width": 3, "height": 4,
            "fillColor": "transparent",
            "createdAt": "2024-05-01T12:00:00Z"
        }"##;
        let row: RawAnnotation = serde_json::from_str(json).expect("row");
        assert_eq!(row.page_index, 2);
        assert!(row.payload.is_empty());
        let (ann, _) = Annotation::from_raw(&row).expect("accepted");
        assert_eq!(ann.style.fill, Paint::None);
    }

    #[test]
    fn index_keeps_input_order_per_page() {
        let mut first = Annotation::from_raw(&raw("text", "first")).expect("a").0;
        first.id = "first".to_string();
        let mut second = first.clone();
        second.id = "second".to_string();
        let mut elsewhere = first.clone();
        elsewhere.id = "elsewhere".to_string();
        elsewhere.source_page_index = 2;
        let all = vec![first, elsewhere, second];
        let index = AnnotationIndex::new(&all);
        let ids: Vec<&str> = index
            .for_page("doc-a", 1)
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert!(index.for_page("doc-b", 1).is_empty());
    }
}
