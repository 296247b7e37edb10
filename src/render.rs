use crate::annotation::{Annotation, AnnotationKind, PathPoint};
use crate::canvas::{Canvas, StrokeStyle};
use crate::error::{AssemblyWarning, WarningCode};
use crate::pdf::{ImageDecodeError, decode_image_bytes};
use crate::transform::{local_point_to_drawing_space, to_drawing_space};
use crate::types::{Color, DrawingRect, Pt};

pub const LINE_HEIGHT_FACTOR: f32 = 1.2;

// Draws one annotation onto the page canvas. A failure affects only this
// annotation; the canvas is left untouched in that case.
pub fn render_annotation(
    canvas: &mut Canvas,
    page_height: Pt,
    annotation: &Annotation,
) -> Result<(), AssemblyWarning> {
    let rect = to_drawing_space(page_height, &annotation.geometry);
    let style = &annotation.style;
    let stroke = style.stroke.color().map(|color| StrokeStyle {
        color,
        width: Pt::from_f32(style.stroke_width.max(0.0)),
    });
    let fill = style.fill.color();

    match &annotation.kind {
        AnnotationKind::Image { data, format_hint } => {
            let image = decode_image_bytes(data, *format_hint).map_err(|err| {
                let code = match err {
                    ImageDecodeError::Unsupported => WarningCode::ImageUnsupported,
                    ImageDecodeError::Decode(_) => WarningCode::ImageUndecodable,
                };
                AssemblyWarning::new(code, annotation.id.as_str(), err.to_string())
            })?;
            canvas.image(&rect, image);
        }
        AnnotationKind::Rect => canvas.rect(&rect, stroke, fill),
        AnnotationKind::Ellipse => {
            let rx = rect.width / 2.0;
            let ry = rect.height / 2.0;
            canvas.ellipse(rect.x + rx, rect.y + ry, rx, ry, stroke, fill);
        }
        AnnotationKind::Text { text } => {
            let color = style
                .stroke
                .color()
                .or(fill)
                .unwrap_or(Color::BLACK);
            draw_text(canvas, &rect, style.font_size, color, text);
        }
        AnnotationKind::FreehandPath {
            points,
            original_width,
            original_height,
        } => {
            if let Some(stroke) = stroke {
                let scaled = scale_path(&rect, points, *original_width, *original_height);
                canvas.polyline(&scaled, stroke);
            }
        }
    }
    Ok(())
}

// First baseline sits one font size below the flipped box origin; further
// lines step down.
fn draw_text(canvas: &mut Canvas, rect: &DrawingRect, font_size: f32, color: Color, text: &str) {
    let size = Pt::from_f32(font_size);
    let step = size * LINE_HEIGHT_FACTOR;
    let mut baseline = rect.y - size;
    for line in text.lines() {
        canvas.text(rect.x, baseline, size, color, line);
        baseline = baseline - step;
    }
}

fn axis_scale(target: Pt, original: f32) -> f32 {
    if original > 0.0 && original.is_finite() {
        target.to_f32() / original
    } else {
        1.0
    }
}

fn scale_path(
    rect: &DrawingRect,
    points: &[PathPoint],
    original_width: f32,
    original_height: f32,
) -> Vec<(Pt, Pt)> {
    let sx = axis_scale(rect.width, original_width);
    let sy = axis_scale(rect.height, original_height);
    points
        .iter()
        .map(|p| {
            local_point_to_drawing_space(rect, Pt::from_f32(p.x * sx), Pt::from_f32(p.y * sy))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Style;
    use crate::canvas::Command;
    use crate::pdf::testing::make_png_bytes;
    use crate::types::{Geometry, Paint};
    use chrono::{DateTime, Utc};

    fn annotation(kind: AnnotationKind, geometry: Geometry) -> Annotation {
        Annotation {
            id: "ann-1".to_string(),
            source_doc_id: "doc".to_string(),
            source_page_index: 2,
            geometry,
            style: Style::default(),
            kind,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("ts"),
        }
    }

    fn letter_height() -> Pt {
        Pt::from_i32(792)
    }

    #[test]
    fn rect_lands_at_flipped_y() {
        let mut canvas = Canvas::new();
        let ann = annotation(AnnotationKind::Rect, Geometry::new(10.0, 20.0, 100.0, 50.0));
        render_annotation(&mut canvas, letter_height(), &ann).expect("render");
        assert!(canvas.commands().contains(&Command::DrawRect {
            x: Pt::from_i32(10),
            y: Pt::from_i32(722),
            width: Pt::from_i32(100),
            height: Pt::from_i32(50),
        }));
        assert!(canvas.commands().contains(&Command::Stroke));
    }

    #[test]
    fn transparent_fill_emits_no_fill_operator() {
        let mut canvas = Canvas::new();
        let mut ann = annotation(AnnotationKind::Ellipse, Geometry::new(0.0, 0.0, 40.0, 20.0));
        ann.style.fill = Paint::parse("transparent");
        render_annotation(&mut canvas, letter_height(), &ann).expect("render");
        let cmds = canvas.commands();
        assert!(!cmds.iter().any(|c| matches!(c, Command::SetFillColor(_))));
        assert!(!cmds.contains(&Command::Fill));
        assert!(!cmds.contains(&Command::FillStroke));

        let mut filled = Canvas::new();
        ann.style.fill = Paint::parse("#00ff00");
        render_annotation(&mut filled, letter_height(), &ann).expect("render");
        assert!(filled.commands().contains(&Command::FillStroke));
    }

    #[test]
    fn ellipse_is_centered_in_its_box() {
        let mut canvas = Canvas::new();
        let ann = annotation(AnnotationKind::Ellipse, Geometry::new(10.0, 20.0, 100.0, 50.0));
        render_annotation(&mut canvas, letter_height(), &ann).expect("render");
        let start = canvas
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::MoveTo { x, y } => Some((*x, *y)),
                _ => None,
            })
            .expect("move");
        assert_eq!(start, (Pt::from_i32(110), Pt::from_i32(747)));
    }

    fn text_baselines(geometry: Geometry) -> Vec<Pt> {
        let mut canvas = Canvas::new();
        let mut ann = annotation(
            AnnotationKind::Text {
                text: "first\nsecond".to_string(),
            },
            geometry,
        );
        ann.style.font_size = 10.0;
        render_annotation(&mut canvas, letter_height(), &ann).expect("render");
        assert!(canvas.uses_text());
        canvas
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::DrawString { y, .. } => Some(*y),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_baseline_sits_below_flipped_origin() {
        // 792 - 20 - 50 - 10
        assert_eq!(
            text_baselines(Geometry::new(10.0, 20.0, 100.0, 50.0)),
            vec![Pt::from_i32(712), Pt::from_i32(700)]
        );
        assert_eq!(
            text_baselines(Geometry::new(10.0, 20.0, 200.0, 0.0)),
            vec![Pt::from_i32(762), Pt::from_i32(750)]
        );
    }

    #[test]
    fn freehand_rescales_each_axis() {
        let mut canvas = Canvas::new();
        let ann = annotation(
            AnnotationKind::FreehandPath {
                points: vec![PathPoint { x: 0.0, y: 0.0 }, PathPoint { x: 50.0, y: 25.0 }],
                original_width: 50.0,
                original_height: 25.0,
            },
            Geometry::new(10.0, 20.0, 100.0, 50.0),
        );
        render_annotation(&mut canvas, letter_height(), &ann).expect("render");
        let cmds = canvas.commands();
        assert!(cmds.contains(&Command::MoveTo {
            x: Pt::from_i32(10),
            y: Pt::from_i32(772),
        }));
        assert!(cmds.contains(&Command::LineTo {
            x: Pt::from_i32(110),
            y: Pt::from_i32(722),
        }));
    }

    #[test]
    fn corrupt_image_is_reported_not_drawn() {
        let mut canvas = Canvas::new();
        let mut bytes = make_png_bytes(4, 4, 255);
        bytes.truncate(24);
        let ann = annotation(
            AnnotationKind::Image {
                data: bytes,
                format_hint: None,
            },
            Geometry::new(0.0, 0.0, 10.0, 10.0),
        );
        let warning = render_annotation(&mut canvas, letter_height(), &ann).expect_err("corrupt");
        assert_eq!(warning.code, WarningCode::ImageUndecodable);
        assert_eq!(warning.subject, "ann-1");
        assert!(canvas.is_empty());

        let unknown = annotation(
            AnnotationKind::Image {
                data: b"BM not supported".to_vec(),
                format_hint: None,
            },
            Geometry::new(0.0, 0.0, 10.0, 10.0),
        );
        let warning = render_annotation(&mut canvas, letter_height(), &unknown).expect_err("bmp");
        assert_eq!(warning.code, WarningCode::ImageUnsupported);
    }

    #[test]
    fn image_registers_xobject() {
        let mut canvas = Canvas::new();
        let ann = annotation(
            AnnotationKind::Image {
                data: make_png_bytes(2, 2, 255),
                format_hint: None,
            },
            Geometry::new(10.0, 20.0, 100.0, 50.0),
        );
        render_annotation(&mut canvas, letter_height(), &ann).expect("render");
        assert_eq!(canvas.images().len(), 1);
        assert!(canvas.commands().contains(&Command::DrawImage {
            x: Pt::from_i32(10),
            y: Pt::from_i32(722),
            width: Pt::from_i32(100),
            height: Pt::from_i32(50),
            resource_id: "DSIm1".to_string(),
        }));
    }
}
