use crate::pdf::ImageData;
use crate::types::{Color, DrawingRect, Pt};
use std::collections::BTreeMap;

// Cubic Bezier control distance for a quarter ellipse.
const KAPPA: f32 = 0.552_284_8;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetLineCap(u8),
    SetLineJoin(u8),
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    Stroke,
    FillStroke,
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    // Baseline-anchored, built-in face.
    DrawString {
        x: Pt,
        y: Pt,
        size: Pt,
        text: String,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: Color,
    pub width: Pt,
}

// Records drawing for one page in bottom-left-origin coordinates. Nothing is
// written to a PDF until the canvas is attached to a page.
#[derive(Debug, Default)]
pub struct Canvas {
    commands: Vec<Command>,
    images: BTreeMap<String, ImageData>,
    uses_text: bool,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn images(&self) -> &BTreeMap<String, ImageData> {
        &self.images
    }

    pub fn uses_text(&self) -> bool {
        self.uses_text
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    fn paint(&mut self, stroke: Option<StrokeStyle>, fill: Option<Color>) {
        let stroke = stroke.filter(|s| s.width > Pt::ZERO);
        if let Some(fill) = fill {
            self.commands.push(Command::SetFillColor(fill));
        }
        if let Some(stroke) = stroke {
            self.commands.push(Command::SetStrokeColor(stroke.color));
            self.commands.push(Command::SetLineWidth(stroke.width));
        }
        match (stroke.is_some(), fill.is_some()) {
            (true, true) => self.commands.push(Command::FillStroke),
            (true, false) => self.commands.push(Command::Stroke),
            (false, true) => self.commands.push(Command::Fill),
            // A path must still be consumed.
            (false, false) => {}
        }
    }

    pub fn rect(&mut self, rect: &DrawingRect, stroke: Option<StrokeStyle>, fill: Option<Color>) {
        if stroke.filter(|s| s.width > Pt::ZERO).is_none() && fill.is_none() {
            return;
        }
        self.commands.push(Command::SaveState);
        self.commands.push(Command::DrawRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
        self.paint(stroke, fill);
        self.commands.push(Command::RestoreState);
    }

    pub fn fill_rect(&mut self, rect: &DrawingRect, color: Color) {
        self.rect(rect, None, Some(color));
    }

    pub fn ellipse(
        &mut self,
        cx: Pt,
        cy: Pt,
        rx: Pt,
        ry: Pt,
        stroke: Option<StrokeStyle>,
        fill: Option<Color>,
    ) {
        if stroke.filter(|s| s.width > Pt::ZERO).is_none() && fill.is_none() {
            return;
        }
        let ox = rx * KAPPA;
        let oy = ry * KAPPA;
        self.commands.push(Command::SaveState);
        self.commands.push(Command::MoveTo { x: cx + rx, y: cy });
        self.commands.push(Command::CurveTo {
            x1: cx + rx,
            y1: cy + oy,
            x2: cx + ox,
            y2: cy + ry,
            x: cx,
            y: cy + ry,
        });
        self.commands.push(Command::CurveTo {
            x1: cx - ox,
            y1: cy + ry,
            x2: cx - rx,
            y2: cy + oy,
            x: cx - rx,
            y: cy,
        });
        self.commands.push(Command::CurveTo {
            x1: cx - rx,
            y1: cy - oy,
            x2: cx - ox,
            y2: cy - ry,
            x: cx,
            y: cy - ry,
        });
        self.commands.push(Command::CurveTo {
            x1: cx + ox,
            y1: cy - ry,
            x2: cx + rx,
            y2: cy - oy,
            x: cx + rx,
            y: cy,
        });
        self.commands.push(Command::ClosePath);
        self.paint(stroke, fill);
        self.commands.push(Command::RestoreState);
    }

    pub fn line(&mut self, from: (Pt, Pt), to: (Pt, Pt), stroke: StrokeStyle) {
        self.polyline(&[from, to], stroke);
    }

    // Consecutive segments through every point; fewer than two points draw nothing.
    pub fn polyline(&mut self, points: &[(Pt, Pt)], stroke: StrokeStyle) {
        if points.len() < 2 || stroke.width <= Pt::ZERO {
            return;
        }
        self.commands.push(Command::SaveState);
        self.commands.push(Command::SetStrokeColor(stroke.color));
        self.commands.push(Command::SetLineWidth(stroke.width));
        self.commands.push(Command::SetLineCap(1));
        self.commands.push(Command::SetLineJoin(1));
        let (x, y) = points[0];
        self.commands.push(Command::MoveTo { x, y });
        for &(x, y) in &points[1..] {
            self.commands.push(Command::LineTo { x, y });
        }
        self.commands.push(Command::Stroke);
        self.commands.push(Command::RestoreState);
    }

    pub fn text(&mut self, x: Pt, baseline: Pt, size: Pt, color: Color, text: &str) {
        if text.is_empty() {
            return;
        }
        self.uses_text = true;
        self.commands.push(Command::SaveState);
        self.commands.push(Command::SetFillColor(color));
        self.commands.push(Command::DrawString {
            x,
            y: baseline,
            size,
            text: text.to_string(),
        });
        self.commands.push(Command::RestoreState);
    }

    pub fn image(&mut self, rect: &DrawingRect, image: ImageData) {
        let resource_id = format!("DSIm{}", self.images.len() + 1);
        self.images.insert(resource_id.clone(), image);
        self.commands.push(Command::SaveState);
        self.commands.push(Command::DrawImage {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            resource_id,
        });
        self.commands.push(Command::RestoreState);
    }
}
