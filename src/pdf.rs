use crate::annotation::ImageFormat;
use crate::canvas::{Canvas, Command};
use crate::types::{Color, Pt, Size};
use chrono::{DateTime, Utc};
use fixed::types::I32F32;
use lopdf::{
    Dictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId,
    Stream as LoStream, dictionary,
};
use thiserror::Error;

pub const PDF_VERSION: &str = "1.7";
pub const FONT_RESOURCE_NAME: &str = "DSHelv";
pub const PRODUCER: &str = "docseal";

const MAX_PAGE_TREE_DEPTH: usize = 64;
const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("pdf object error: {0}")]
    Object(#[from] lopdf::Error),
    #[error("pdf page {0:?} is not a page dictionary")]
    NotAPage(LoObjectId),
    #[error("pdf write error: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("unsupported image format")]
    Unsupported,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlphaData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    // None means raw samples; compressed when the document is serialized.
    pub filter: Option<&'static str>,
    pub data: Vec<u8>,
    pub alpha: Option<AlphaData>,
    // Adobe CMYK JPEGs store inverted samples.
    pub inverted: bool,
}

// Magic bytes win over the hint; no format means no decode attempt.
pub fn decode_image_bytes(
    data: &[u8],
    hint: Option<ImageFormat>,
) -> Result<ImageData, ImageDecodeError> {
    let format = ImageFormat::sniff(data)
        .or(hint)
        .ok_or(ImageDecodeError::Unsupported)?;

    match format {
        ImageFormat::Jpeg => {
            let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
            // The decoder converts CMYK to RGB, but the passthrough bytes keep
            // the frame's own component count.
            let header = scan_jpeg_header(data);
            let color_space = match header.components {
                Some(1) => "DeviceGray",
                Some(4) => "DeviceCMYK",
                Some(_) => "DeviceRGB",
                None => match decoded.color() {
                    image::ColorType::L8 | image::ColorType::La8 => "DeviceGray",
                    _ => "DeviceRGB",
                },
            };
            Ok(ImageData {
                width: decoded.width(),
                height: decoded.height(),
                color_space,
                bits_per_component: 8,
                filter: Some("DCTDecode"),
                data: data.to_vec(),
                alpha: None,
                inverted: color_space == "DeviceCMYK" && header.adobe,
            })
        }
        ImageFormat::Png => {
            let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Png)?;
            let rgba = decoded.to_rgba8();
            let (width, height) = rgba.dimensions();
            let mut rgb = Vec::with_capacity((width * height * 3) as usize);
            let mut alpha = Vec::with_capacity((width * height) as usize);
            let mut has_alpha = false;
            for pixel in rgba.pixels() {
                let [r, g, b, a] = pixel.0;
                if a != 255 {
                    has_alpha = true;
                }
                rgb.extend_from_slice(&[r, g, b]);
                alpha.push(a);
            }
            Ok(ImageData {
                width,
                height,
                color_space: "DeviceRGB",
                bits_per_component: 8,
                filter: None,
                data: rgb,
                alpha: has_alpha.then_some(AlphaData {
                    width,
                    height,
                    data: alpha,
                }),
                inverted: false,
            })
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct JpegHeader {
    components: Option<u8>,
    adobe: bool,
}

// Walks marker segments up to the first start-of-frame.
fn scan_jpeg_header(data: &[u8]) -> JpegHeader {
    let mut header = JpegHeader::default();
    if !data.starts_with(&[0xFF, 0xD8]) {
        return header;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            break;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 {
            break;
        }
        let body = &data[pos + 4..(pos + 2 + len).min(data.len())];
        match marker {
            0xEE if body.starts_with(b"Adobe") => header.adobe = true,
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                header.components = body.get(5).copied();
                break;
            }
            0xDA | 0xD9 => break,
            _ => {}
        }
        pos += 2 + len;
    }
    header
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn color_operands(color: Color) -> String {
    format!(
        "{} {} {}",
        fmt(clamp_unit(color.r)),
        fmt(clamp_unit(color.g)),
        fmt(clamp_unit(color.b))
    )
}

// Helvetica with WinAnsiEncoding: Latin-1 passes through, everything else is '?'.
fn encode_text_hex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2 + 2);
    out.push('<');
    for ch in text.chars() {
        let code = ch as u32;
        let byte = if (0x20..0x7F).contains(&code) || (0xA0..=0xFF).contains(&code) {
            code as u8
        } else {
            b'?'
        };
        out.push_str(&format!("{:02X}", byte));
    }
    out.push('>');
    out
}

pub fn render_commands(commands: &[Command]) -> Vec<u8> {
    let mut out = String::new();
    for cmd in commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::SetFillColor(color) => {
                out.push_str(&format!("{} rg\n", color_operands(*color)));
            }
            Command::SetStrokeColor(color) => {
                out.push_str(&format!("{} RG\n", color_operands(*color)));
            }
            Command::SetLineWidth(width) => out.push_str(&format!("{} w\n", fmt_pt(*width))),
            Command::SetLineCap(cap) => out.push_str(&format!("{} J\n", cap)),
            Command::SetLineJoin(join) => out.push_str(&format!("{} j\n", join)),
            Command::MoveTo { x, y } => {
                out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(*y)));
            }
            Command::LineTo { x, y } => {
                out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(*y)));
            }
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} {} {} c\n",
                    fmt_pt(*x1),
                    fmt_pt(*y1),
                    fmt_pt(*x2),
                    fmt_pt(*y2),
                    fmt_pt(*x),
                    fmt_pt(*y)
                ));
            }
            Command::ClosePath => out.push_str("h\n"),
            Command::Fill => out.push_str("f\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::FillStroke => out.push_str("B\n"),
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\n",
                    fmt_pt(*x),
                    fmt_pt(*y),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::DrawString { x, y, size, text } => {
                out.push_str(&format!(
                    "BT /{} {} Tf {} {} Td {} Tj ET\n",
                    FONT_RESOURCE_NAME,
                    fmt_pt(*size),
                    fmt_pt(*x),
                    fmt_pt(*y),
                    encode_text_hex(text)
                ));
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                out.push_str(&format!(
                    "q {} 0 0 {} {} {} cm /{} Do Q\n",
                    fmt_pt(*width),
                    fmt_pt(*height),
                    fmt_pt(*x),
                    fmt_pt(*y),
                    resource_id
                ));
            }
        }
    }
    out.into_bytes()
}

fn object_number(obj: &LoObject) -> Option<f32> {
    match obj {
        LoObject::Integer(v) => Some(*v as f32),
        LoObject::Real(v) => Some(*v as f32),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn inherited_attribute(doc: &LoDocument, page: &Dictionary, key: &[u8]) -> Option<LoObject> {
    let mut dict = page;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        let parent_id = dict.get(b"Parent").and_then(LoObject::as_reference).ok()?;
        dict = doc.get_object(parent_id).and_then(LoObject::as_dict).ok()?;
    }
    None
}

fn box_size(doc: &LoDocument, obj: &LoObject) -> Option<Size> {
    let values = resolve(doc, obj).as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let nums: Vec<f32> = values
        .iter()
        .map(|v| object_number(resolve(doc, v)))
        .collect::<Option<Vec<f32>>>()?;
    Some(Size {
        width: Pt::from_f32((nums[2] - nums[0]).abs()),
        height: Pt::from_f32((nums[3] - nums[1]).abs()),
    })
}

fn sub_dictionary(doc: &LoDocument, parent: &Dictionary, key: &[u8]) -> Dictionary {
    match parent.get(key) {
        Ok(obj) => resolve(doc, obj).as_dict().cloned().unwrap_or_default(),
        Err(_) => Dictionary::new(),
    }
}

fn pdf_date(ts: &DateTime<Utc>) -> String {
    format!("D:{}Z", ts.format("%Y%m%d%H%M%S"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopiedPage {
    pub id: LoObjectId,
    pub size: Size,
    // Normalized into 0..360.
    pub rotate: i64,
}

// The output document under construction. Pages are created detached and only
// become part of the page tree through `push_page`.
pub struct OutputDocument {
    doc: LoDocument,
    pages_id: LoObjectId,
    kids: Vec<LoObjectId>,
    font_id: Option<LoObjectId>,
}

impl Default for OutputDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDocument {
    pub fn new() -> Self {
        let mut doc = LoDocument::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            font_id: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    pub fn page_ids(&self) -> &[LoObjectId] {
        &self.kids
    }

    // Moves every object of `src` into this document's id space and returns
    // the source page ids in page order.
    pub fn import(&mut self, mut src: LoDocument) -> Vec<LoObjectId> {
        let start_id = self.doc.max_id + 1;
        src.renumber_objects_with(start_id);
        let page_ids: Vec<LoObjectId> = src.get_pages().values().copied().collect();
        if src.max_id > self.doc.max_id {
            self.doc.max_id = src.max_id;
        }
        self.doc.objects.extend(src.objects);
        page_ids
    }

    // Independent copy of an imported page. Inherited attributes are pulled
    // down so the copy does not depend on the source page tree.
    pub fn copy_page(&mut self, src_page: LoObjectId) -> Result<CopiedPage, PdfError> {
        let src = self
            .doc
            .get_object(src_page)
            .and_then(LoObject::as_dict)
            .map_err(|_| PdfError::NotAPage(src_page))?;

        let mut page = Dictionary::new();
        for (key, value) in src.iter() {
            if key.as_slice() == b"Parent" || key.as_slice() == b"Annots" {
                continue;
            }
            page.set(key.clone(), value.clone());
        }
        for key in INHERITABLE_KEYS {
            if page.has(key) {
                continue;
            }
            if let Some(value) = inherited_attribute(&self.doc, src, key) {
                page.set(key.to_vec(), value);
            }
        }

        let size = page
            .get(b"MediaBox")
            .ok()
            .and_then(|obj| box_size(&self.doc, obj))
            .unwrap_or_else(Size::letter);
        let rotate = page
            .get(b"Rotate")
            .ok()
            .and_then(|obj| resolve(&self.doc, obj).as_i64().ok())
            .unwrap_or(0)
            .rem_euclid(360);

        if !page.has(b"MediaBox") {
            page.set(
                "MediaBox",
                vec![
                    0.into(),
                    0.into(),
                    size.width.to_f32().into(),
                    size.height.to_f32().into(),
                ],
            );
        }
        page.set("Type", "Page");
        page.set("Parent", self.pages_id);
        page.set("Rotate", rotate);
        let id = self.doc.add_object(page);
        Ok(CopiedPage { id, size, rotate })
    }

    pub fn set_rotation(&mut self, page_id: LoObjectId, degrees: i64) -> Result<(), PdfError> {
        let page = self
            .doc
            .get_object_mut(page_id)
            .and_then(LoObject::as_dict_mut)?;
        page.set("Rotate", degrees);
        Ok(())
    }

    pub fn rotation(&self, page_id: LoObjectId) -> Option<i64> {
        self.doc
            .get_object(page_id)
            .and_then(LoObject::as_dict)
            .and_then(|d| d.get(b"Rotate"))
            .and_then(LoObject::as_i64)
            .ok()
    }

    pub fn page_size(&self, page_id: LoObjectId) -> Option<Size> {
        let page = self.doc.get_object(page_id).and_then(LoObject::as_dict).ok()?;
        let media_box = page.get(b"MediaBox").ok()?;
        box_size(&self.doc, media_box)
    }

    pub fn new_blank_page(&mut self, size: Size) -> LoObjectId {
        self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                size.width.to_f32().into(),
                size.height.to_f32().into(),
            ],
            "Resources" => Dictionary::new(),
            "Rotate" => 0,
        })
    }

    pub fn push_page(&mut self, page_id: LoObjectId) {
        self.kids.push(page_id);
    }

    fn ensure_font(&mut self) -> LoObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        self.font_id = Some(id);
        id
    }

    fn add_image(&mut self, image: &ImageData) -> LoObjectId {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => image.bits_per_component as i64,
        };
        if let Some(filter) = image.filter {
            dict.set("Filter", filter);
        }
        if image.inverted && image.color_space == "DeviceCMYK" {
            let decode: Vec<LoObject> = [1i64, 0, 1, 0, 1, 0, 1, 0]
                .into_iter()
                .map(LoObject::from)
                .collect();
            dict.set("Decode", decode);
        }
        if let Some(alpha) = &image.alpha {
            let smask_id = self.doc.add_object(LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => alpha.width as i64,
                    "Height" => alpha.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                alpha.data.clone(),
            ));
            dict.set("SMask", smask_id);
        }
        self.doc.add_object(LoStream::new(dict, image.data.clone()))
    }

    // Appends the canvas as a new content stream. The page's own content is
    // bracketed in q/Q first so its graphics state cannot leak into the overlay.
    pub fn attach(&mut self, page_id: LoObjectId, canvas: &Canvas) -> Result<(), PdfError> {
        if canvas.is_empty() {
            return Ok(());
        }
        let page = self
            .doc
            .get_object(page_id)
            .and_then(LoObject::as_dict)
            .map_err(|_| PdfError::NotAPage(page_id))?;

        let mut resources = match page.get(b"Resources") {
            Ok(obj) => resolve(&self.doc, obj).as_dict().cloned().unwrap_or_default(),
            Err(_) => Dictionary::new(),
        };
        let mut fonts = sub_dictionary(&self.doc, &resources, b"Font");
        let mut xobjects = sub_dictionary(&self.doc, &resources, b"XObject");
        let existing: Vec<LoObject> = match page.get(b"Contents") {
            Ok(LoObject::Array(items)) => items.clone(),
            // An indirect /Contents may itself be the array of streams.
            Ok(obj @ LoObject::Reference(id)) => match self.doc.get_object(*id) {
                Ok(LoObject::Array(items)) => items.clone(),
                _ => vec![obj.clone()],
            },
            _ => Vec::new(),
        };

        if canvas.uses_text() {
            let font_id = self.ensure_font();
            fonts.set(FONT_RESOURCE_NAME, font_id);
        }
        for (name, image) in canvas.images() {
            let image_id = self.add_image(image);
            xobjects.set(name.as_bytes().to_vec(), image_id);
        }
        resources.set("Font", fonts);
        resources.set("XObject", xobjects);

        let mut contents: Vec<LoObject> = Vec::with_capacity(existing.len() + 3);
        if !existing.is_empty() {
            let open = self
                .doc
                .add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
            let close = self
                .doc
                .add_object(LoStream::new(dictionary! {}, b"\nQ\n".to_vec()));
            contents.push(open.into());
            contents.extend(existing);
            contents.push(close.into());
        }
        let overlay = self.doc.add_object(LoStream::new(
            dictionary! {},
            render_commands(canvas.commands()),
        ));
        contents.push(overlay.into());

        let page = self
            .doc
            .get_object_mut(page_id)
            .and_then(LoObject::as_dict_mut)?;
        page.set("Resources", resources);
        page.set("Contents", contents);
        Ok(())
    }

    pub fn finish(mut self, modified_at: &DateTime<Utc>) -> Result<Vec<u8>, PdfError> {
        let kids: Vec<LoObject> = self.kids.iter().map(|id| (*id).into()).collect();
        self.doc.objects.insert(
            self.pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.kids.len() as i64,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.doc.add_object(dictionary! {
            "Producer" => LoObject::string_literal(PRODUCER),
            "ModDate" => LoObject::string_literal(pdf_date(modified_at)),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);
        self.doc.prune_objects();
        self.doc.renumber_objects();
        self.doc.compress();

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|err| PdfError::Write(err.to_string()))?;
        Ok(out)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::canvas::StrokeStyle;
    use crate::types::DrawingRect;

    fn content_text(doc: &LoDocument, page_id: LoObjectId) -> String {
        String::from_utf8_lossy(&doc.get_page_content(page_id).expect("content")).into_owned()
    }

    #[test]
    fn format_milli_trims_trailing_zeros() {
        assert_eq!(format_milli(722_000), "722");
        assert_eq!(format_milli(-1_500), "-1.5");
        assert_eq!(format_milli(125), "0.125");
        assert_eq!(fmt(0.5), "0.5");
    }

    #[test]
    fn render_commands_emits_pdf_operators() {
        let cmds = vec![
            Command::SaveState,
            Command::SetStrokeColor(Color::rgb(1.0, 0.0, 0.0)),
            Command::DrawRect {
                x: Pt::from_f32(10.0),
                y: Pt::from_f32(722.0),
                width: Pt::from_f32(100.0),
                height: Pt::from_f32(50.0),
            },
            Command::Stroke,
            Command::DrawString {
                x: Pt::from_i32(1),
                y: Pt::from_i32(2),
                size: Pt::from_i32(12),
                text: "Hi (é) ✓".to_string(),
            },
            Command::RestoreState,
        ];
        let text = String::from_utf8(render_commands(&cmds)).expect("ascii");
        assert!(text.contains("1 0 0 RG\n"));
        assert!(text.contains("10 722 100 50 re\n"));
        assert!(text.contains("S\n"));
        assert!(text.contains("BT /DSHelv 12 Tf 1 2 Td <48692028E929203F> Tj ET"));
    }

    #[test]
    fn decode_png_splits_alpha_channel() {
        let opaque = decode_image_bytes(&make_png_bytes(2, 3, 255), None).expect("png");
        assert_eq!((opaque.width, opaque.height), (2, 3));
        assert_eq!(opaque.data.len(), 2 * 3 * 3);
        assert!(opaque.alpha.is_none());
        assert!(opaque.filter.is_none());

        let translucent = decode_image_bytes(&make_png_bytes(2, 2, 128), None).expect("png");
        assert_eq!(translucent.alpha.expect("alpha").data, vec![128; 4]);
    }

    #[test]
    fn decode_jpeg_passes_bytes_through() {
        let bytes = make_jpeg_bytes(4, 4);
        let decoded = decode_image_bytes(&bytes, None).expect("jpeg");
        assert_eq!(decoded.filter, Some("DCTDecode"));
        assert_eq!(decoded.data, bytes);
        assert_eq!(decoded.color_space, "DeviceRGB");
    }

    #[test]
    fn jpeg_header_reports_frame_components() {
        let rgb = make_jpeg_bytes(4, 4);
        assert_eq!(scan_jpeg_header(&rgb).components, Some(3));
        assert!(!scan_jpeg_header(&rgb).adobe);

        // SOI, APP14 "Adobe", SOF0 8-bit 1x1 with four components.
        let mut cmyk = vec![0xFF, 0xD8, 0xFF, 0xEE, 0x00, 0x0E];
        cmyk.extend_from_slice(b"Adobe");
        cmyk.extend_from_slice(&[0x00, 0x64, 0x00, 0x00, 0x00, 0x00, 0x02]);
        cmyk.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x14, 0x08, 0x00, 0x01, 0x00, 0x01, 0x04]);
        for id in 1..=4u8 {
            cmyk.extend_from_slice(&[id, 0x11, 0x00]);
        }
        let header = scan_jpeg_header(&cmyk);
        assert_eq!(header.components, Some(4));
        assert!(header.adobe);

        assert_eq!(scan_jpeg_header(b"not a jpeg"), JpegHeader::default());
    }

    #[test]
    fn inverted_cmyk_image_gets_decode_array() {
        let mut out = OutputDocument::new();
        let image = ImageData {
            width: 1,
            height: 1,
            color_space: "DeviceCMYK",
            bits_per_component: 8,
            filter: Some("DCTDecode"),
            data: vec![0xFF, 0xD8],
            alpha: None,
            inverted: true,
        };
        let id = out.add_image(&image);
        let stream = out.doc.get_object(id).and_then(LoObject::as_stream).expect("stream");
        assert_eq!(
            stream.dict.get(b"ColorSpace").and_then(LoObject::as_name).expect("cs"),
            b"DeviceCMYK"
        );
        let decode = stream.dict.get(b"Decode").and_then(LoObject::as_array).expect("decode");
        assert_eq!(decode.len(), 8);
        assert_eq!(decode[0].as_i64().expect("int"), 1);
    }

    #[test]
    fn decode_rejects_unknown_and_corrupt_payloads() {
        assert!(matches!(
            decode_image_bytes(b"GIF89a....", None),
            Err(ImageDecodeError::Unsupported)
        ));
        let mut truncated = make_png_bytes(4, 4, 255);
        truncated.truncate(20);
        assert!(matches!(
            decode_image_bytes(&truncated, None),
            Err(ImageDecodeError::Decode(_))
        ));
    }

    #[test]
    fn copy_page_pulls_down_inherited_attributes() {
        let src = LoDocument::load_mem(&make_pdf_bytes_with(&[(300, 400)], true, 90))
            .expect("load");
        let mut out = OutputDocument::new();
        let pages = out.import(src);
        let copied = out.copy_page(pages[0]).expect("copy");
        assert_eq!(copied.size.width, Pt::from_i32(300));
        assert_eq!(copied.size.height, Pt::from_i32(400));
        assert_eq!(copied.rotate, 90);
        assert_eq!(out.page_size(copied.id), Some(copied.size));
        assert_eq!(out.rotation(copied.id), Some(90));
    }

    #[test]
    fn copies_of_the_same_page_are_independent() {
        let src = LoDocument::load_mem(&make_pdf_bytes(1)).expect("load");
        let mut out = OutputDocument::new();
        let pages = out.import(src);
        let a = out.copy_page(pages[0]).expect("a");
        let b = out.copy_page(pages[0]).expect("b");
        assert_ne!(a.id, b.id);
        out.set_rotation(b.id, 180).expect("rotate");
        assert_eq!(out.rotation(a.id), Some(0));
        assert_eq!(out.rotation(b.id), Some(180));
    }

    #[test]
    fn attach_wraps_original_content_and_registers_resources() {
        let src = LoDocument::load_mem(&make_pdf_bytes(1)).expect("load");
        let mut out = OutputDocument::new();
        let pages = out.import(src);
        let copied = out.copy_page(pages[0]).expect("copy");

        let mut canvas = Canvas::new();
        let rect = DrawingRect {
            x: Pt::from_i32(10),
            y: Pt::from_i32(722),
            width: Pt::from_i32(100),
            height: Pt::from_i32(50),
        };
        canvas.rect(
            &rect,
            Some(StrokeStyle {
                color: Color::BLACK,
                width: Pt::from_i32(1),
            }),
            None,
        );
        canvas.text(Pt::from_i32(10), Pt::from_i32(700), Pt::from_i32(12), Color::BLACK, "x");
        let png = decode_image_bytes(&make_png_bytes(1, 1, 255), None).expect("png");
        canvas.image(&rect, png);
        out.attach(copied.id, &canvas).expect("attach");
        out.push_page(copied.id);

        let bytes = out.finish(&Utc::now()).expect("finish");
        let doc = LoDocument::load_mem(&bytes).expect("reload");
        let page_id = *doc.get_pages().get(&1).expect("page 1");
        let text = content_text(&doc, page_id);
        assert!(text.starts_with("q\n"));
        assert!(text.contains("PAGE 1"));
        assert!(text.contains("10 722 100 50 re"));
        assert!(text.contains("/DSIm1 Do"));

        let page = doc.get_object(page_id).and_then(LoObject::as_dict).expect("page");
        let resources = page.get(b"Resources").and_then(LoObject::as_dict).expect("res");
        let fonts = resources.get(b"Font").and_then(LoObject::as_dict).expect("fonts");
        assert!(fonts.has(b"F1"));
        assert!(fonts.has(FONT_RESOURCE_NAME.as_bytes()));
        let xobjects = resources.get(b"XObject").and_then(LoObject::as_dict).expect("xobj");
        assert!(xobjects.has(b"DSIm1"));
    }

    #[test]
    fn attach_keeps_streams_behind_an_indirect_contents_array() {
        let mut src = LoDocument::with_version("1.5");
        let pages_id = src.new_object_id();
        let stream_id = src.add_object(LoStream::new(
            dictionary! {},
            b"BT /F1 18 Tf 72 720 Td (PAGE A) Tj ET".to_vec(),
        ));
        let contents_id = src.add_object(vec![LoObject::from(stream_id)]);
        let page_id = src.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => contents_id,
        });
        src.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => 1,
                "Kids" => vec![page_id.into()],
            }),
        );
        let catalog_id = src.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        src.trailer.set("Root", catalog_id);

        let mut out = OutputDocument::new();
        let pages = out.import(src);
        let copied = out.copy_page(pages[0]).expect("copy");
        let mut canvas = Canvas::new();
        let rect = DrawingRect {
            x: Pt::from_i32(10),
            y: Pt::from_i32(10),
            width: Pt::from_i32(5),
            height: Pt::from_i32(5),
        };
        canvas.rect(
            &rect,
            Some(StrokeStyle {
                color: Color::BLACK,
                width: Pt::from_i32(1),
            }),
            None,
        );
        out.attach(copied.id, &canvas).expect("attach");
        out.push_page(copied.id);

        let bytes = out.finish(&Utc::now()).expect("finish");
        let doc = LoDocument::load_mem(&bytes).expect("reload");
        let page_id = *doc.get_pages().get(&1).expect("page 1");
        let page = doc.get_object(page_id).and_then(LoObject::as_dict).expect("page");
        let contents = page.get(b"Contents").and_then(LoObject::as_array).expect("contents");
        assert_eq!(contents.len(), 4);
        for entry in contents {
            let id = entry.as_reference().expect("reference");
            assert!(doc.get_object(id).and_then(LoObject::as_stream).is_ok());
        }
        let text = content_text(&doc, page_id);
        assert!(text.contains("PAGE A"));
        assert!(text.contains("10 10 5 5 re"));
    }

    #[test]
    fn finish_is_deterministic_for_identical_input() {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("ts");
        let build = || {
            let src = LoDocument::load_mem(&make_pdf_bytes(2)).expect("load");
            let mut out = OutputDocument::new();
            let pages = out.import(src);
            for page in pages {
                let copied = out.copy_page(page).expect("copy");
                out.push_page(copied.id);
            }
            let blank = out.new_blank_page(Size::letter());
            out.push_page(blank);
            out.finish(&ts).expect("finish")
        };
        let a = build();
        let b = build();
        assert_eq!(a, b);
        let doc = LoDocument::load_mem(&a).expect("reload");
        assert_eq!(doc.get_pages().len(), 3);
    }
}
