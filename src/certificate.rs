use crate::audit::{AuditEntry, sort_for_certificate};
use crate::canvas::{Canvas, StrokeStyle};
use crate::error::AssemblyError;
use crate::pdf::OutputDocument;
use crate::types::{Color, DrawingRect, Pt, Size};
use chrono::{DateTime, Utc};
use docseal_integrity::IntegrityToken;
use lopdf::ObjectId as LoObjectId;
use qrcode::{EcLevel, QrCode};

pub const DEFAULT_CAPTIONS: [&str; 3] = [
    "This document was assembled and sealed electronically.",
    "Scan the code to confirm this copy against the issued integrity record.",
    "Any change to the file after sealing will fail verification.",
];

// Helvetica averages a little over half an em per glyph.
const AVG_GLYPH_WIDTH_EM: f32 = 0.52;
const ROW_LEADING: f32 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSpec {
    pub base_url: String,
    pub captions: [String; 3],
    pub code_size: f32,
    pub caption_size: f32,
    pub margin: f32,
}

impl Default for VerificationSpec {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            captions: DEFAULT_CAPTIONS.map(str::to_string),
            code_size: 56.0,
            caption_size: 7.0,
            margin: 24.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateSpec {
    pub title: String,
    pub page_size: Size,
    pub max_audit_rows: usize,
    pub title_size: f32,
    pub body_size: f32,
    pub row_size: f32,
    pub code_size: f32,
    pub margin: f32,
}

impl Default for CertificateSpec {
    fn default() -> Self {
        Self {
            title: "Certificate of Completion".to_string(),
            page_size: Size::letter(),
            max_audit_rows: 40,
            title_size: 20.0,
            body_size: 11.0,
            row_size: 9.0,
            code_size: 96.0,
            margin: 54.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateSummary {
    pub rows_rendered: usize,
    pub rows_truncated: usize,
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub fn verification_url(base_url: &str, document_id: &str, token: &IntegrityToken) -> String {
    let base = base_url.trim();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}doc={}&token={}",
        base,
        separator,
        encode_query_value(document_id),
        encode_query_value(token.as_str())
    )
}

// Dark modules of a QR symbol, row 0 at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrMatrix {
    width: usize,
    dark: Vec<bool>,
}

impl QrMatrix {
    pub fn encode(data: &str) -> Result<Self, qrcode::types::QrError> {
        let code = QrCode::with_error_correction_level(data, EcLevel::M)?;
        let dark = code
            .to_colors()
            .into_iter()
            .map(|module| module == qrcode::Color::Dark)
            .collect();
        Ok(Self {
            width: code.width(),
            dark,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_dark(&self, row: usize, col: usize) -> bool {
        self.dark.get(row * self.width + col).copied().unwrap_or(false)
    }

    // Horizontal runs of dark modules per row: (row, first column, length).
    fn runs(&self) -> Vec<(usize, usize, usize)> {
        let mut runs = Vec::new();
        for row in 0..self.width {
            let mut col = 0;
            while col < self.width {
                if !self.is_dark(row, col) {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < self.width && self.is_dark(row, col) {
                    col += 1;
                }
                runs.push((row, start, col - start));
            }
        }
        runs
    }
}

// `origin` is the bottom-left corner of the square symbol.
fn draw_code(canvas: &mut Canvas, matrix: &QrMatrix, origin: (Pt, Pt), size: Pt) {
    if matrix.width() == 0 {
        return;
    }
    let module = size.to_f32() / matrix.width() as f32;
    let top = origin.1 + size;
    for (row, col, len) in matrix.runs() {
        let rect = DrawingRect {
            x: origin.0 + Pt::from_f32(col as f32 * module),
            y: top - Pt::from_f32((row + 1) as f32 * module),
            width: Pt::from_f32(len as f32 * module),
            height: Pt::from_f32(module),
        };
        canvas.fill_rect(&rect, Color::BLACK);
    }
}

fn fit_line(text: &str, size: f32, available: Pt) -> String {
    let max_chars = (available.to_f32() / (size * AVG_GLYPH_WIDTH_EM)).floor().max(4.0) as usize;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars - 3).collect();
    clipped.push_str("...");
    clipped
}

fn render_failed(what: &str, err: impl std::fmt::Display) -> AssemblyError {
    AssemblyError::Render {
        what: what.to_string(),
        message: err.to_string(),
    }
}

// Divider, verification code and three caption lines along the bottom edge.
pub fn apply_verification_footer(
    output: &mut OutputDocument,
    page_id: LoObjectId,
    page_size: Size,
    spec: &VerificationSpec,
    url: &str,
) -> Result<(), AssemblyError> {
    const WHAT: &str = "verification footer";
    let matrix = QrMatrix::encode(url).map_err(|err| render_failed(WHAT, err))?;

    let margin = Pt::from_f32(spec.margin);
    let code_size = Pt::from_f32(spec.code_size);
    let caption_size = Pt::from_f32(spec.caption_size);
    let divider_y = margin + code_size + Pt::from_f32(6.0);
    let text_x = margin + code_size + Pt::from_f32(10.0);
    let gray = Color::rgb(0.4, 0.4, 0.4);

    let mut canvas = Canvas::new();
    canvas.line(
        (margin, divider_y),
        (page_size.width - margin, divider_y),
        StrokeStyle {
            color: gray,
            width: Pt::from_f32(0.5),
        },
    );
    draw_code(&mut canvas, &matrix, (margin, margin), code_size);

    let available = page_size.width - margin - text_x;
    let step = caption_size * ROW_LEADING;
    let mut baseline = margin + code_size - caption_size;
    for caption in &spec.captions {
        let line = fit_line(caption, spec.caption_size, available);
        canvas.text(text_x, baseline, caption_size, gray, &line);
        baseline = baseline - step;
    }

    output
        .attach(page_id, &canvas)
        .map_err(|err| render_failed(WHAT, err))
}

// Appends the certificate page: header with the verification code, then the
// audit trail oldest first until the row cap or the bottom margin is reached.
pub fn build_certificate_page(
    output: &mut OutputDocument,
    spec: &CertificateSpec,
    document_id: &str,
    generated_at: &DateTime<Utc>,
    url: &str,
    entries: &[AuditEntry],
) -> Result<CertificateSummary, AssemblyError> {
    const WHAT: &str = "certificate page";
    let matrix = QrMatrix::encode(url).map_err(|err| render_failed(WHAT, err))?;

    let size = spec.page_size;
    let margin = Pt::from_f32(spec.margin);
    let code_size = Pt::from_f32(spec.code_size);
    let title_size = Pt::from_f32(spec.title_size);
    let body_size = Pt::from_f32(spec.body_size);
    let row_size = Pt::from_f32(spec.row_size);
    let top = size.height - margin;
    let code_x = size.width - margin - code_size;
    let text_width = code_x - margin - Pt::from_f32(12.0);
    let full_width = size.width - margin - margin;

    let mut canvas = Canvas::new();
    draw_code(&mut canvas, &matrix, (code_x, top - code_size), code_size);

    let mut baseline = top - title_size;
    canvas.text(margin, baseline, title_size, Color::BLACK, &spec.title);
    baseline = baseline - title_size * ROW_LEADING;
    let header = [
        format!("Document: {}", document_id),
        format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Verify: {}", url),
    ];
    for line in &header {
        let line = fit_line(line, spec.body_size, text_width);
        canvas.text(margin, baseline, body_size, Color::BLACK, &line);
        baseline = baseline - body_size * ROW_LEADING;
    }

    let divider_y = baseline.min(top - code_size) - Pt::from_f32(8.0);
    canvas.line(
        (margin, divider_y),
        (size.width - margin, divider_y),
        StrokeStyle {
            color: Color::BLACK,
            width: Pt::from_f32(0.75),
        },
    );

    baseline = divider_y - body_size * ROW_LEADING;
    canvas.text(margin, baseline, body_size, Color::BLACK, "Audit trail");
    baseline = baseline - body_size * ROW_LEADING;

    let step = row_size * ROW_LEADING;
    let room = (baseline - margin).to_f32().max(0.0);
    let capacity = if step > Pt::ZERO {
        (room / step.to_f32()).floor() as usize + usize::from(baseline >= margin)
    } else {
        0
    };
    let limit = spec.max_audit_rows.min(capacity);
    let sorted = sort_for_certificate(entries);
    let rendered = sorted.len().min(limit);

    if sorted.is_empty() {
        canvas.text(
            margin,
            baseline,
            row_size,
            Color::rgb(0.4, 0.4, 0.4),
            "No audit entries recorded.",
        );
    }
    for entry in sorted.iter().take(rendered) {
        let line = fit_line(&entry.certificate_line(), spec.row_size, full_width);
        canvas.text(margin, baseline, row_size, Color::BLACK, &line);
        baseline = baseline - step;
    }

    let page_id = output.new_blank_page(size);
    output
        .attach(page_id, &canvas)
        .map_err(|err| render_failed(WHAT, err))?;
    output.push_page(page_id);

    let summary = CertificateSummary {
        rows_rendered: rendered,
        rows_truncated: sorted.len() - rendered,
    };
    if summary.rows_truncated > 0 {
        log::debug!(
            "certificate for {} shows {} of {} audit entries",
            document_id,
            summary.rows_rendered,
            sorted.len()
        );
    }
    Ok(summary)
}
