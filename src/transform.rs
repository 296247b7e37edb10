use crate::types::{DrawingRect, Geometry, Pt};

// y_drawing = page_height - y - height. No rotation handling: placement is
// relative to the unrotated page and /Rotate is applied by the viewer.
// page_height must come from the destination page after copying.
pub fn to_drawing_space(page_height: Pt, geometry: &Geometry) -> DrawingRect {
    let height = Pt::from_f32(geometry.height);
    DrawingRect {
        x: Pt::from_f32(geometry.x),
        y: page_height - Pt::from_f32(geometry.y) - height,
        width: Pt::from_f32(geometry.width),
        height,
    }
}

pub fn from_drawing_space(page_height: Pt, rect: &DrawingRect) -> Geometry {
    Geometry {
        x: rect.x.to_f32(),
        y: (page_height - rect.y - rect.height).to_f32(),
        width: rect.width.to_f32(),
        height: rect.height.to_f32(),
    }
}

// Maps a point from an annotation's local top-left box onto the page.
pub fn local_point_to_drawing_space(rect: &DrawingRect, local_x: Pt, local_y: Pt) -> (Pt, Pt) {
    (rect.x + local_x, rect.top() - local_y)
}
