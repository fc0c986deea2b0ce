//! In-memory bounding-box list for the image currently being annotated.
//!
//! Every gesture touches exactly one entry (or appends/removes one) and never
//! reorders the others. Overlapping boxes are kept as drawn.

use thiserror::Error;
use tracing::debug;

use crate::schema::BoundingBox;

/// Colors handed out to new boxes, in order.
pub const PALETTE: &[&str] = &[
    "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF",
];

/// A rectangle in canvas (display) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// What a [`BoxEditor::reconcile`] pass found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorChange {
    Unchanged,
    Added(usize),
    Updated(usize),
    Removed(usize),
    /// More than one gesture's worth of difference; geometry was taken from
    /// the canvas wholesale and colors kept by position.
    Replaced,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("no box at index {index} (have {len})")]
    NoSuchBox { index: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct BoxEditor {
    boxes: Vec<BoundingBox>,
    /// Multiplier from canvas coordinates to image pixels.
    scale: f64,
}

impl Default for BoxEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxEditor {
    pub fn new() -> Self {
        Self {
            boxes: Vec::new(),
            scale: 1.0,
        }
    }

    /// Seed the editor from a previously confirmed record.
    pub fn from_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes, scale: 1.0 }
    }

    /// Set the canvas-to-image scale factor used by [`add`](Self::add) and
    /// [`reconcile`](Self::reconcile).
    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        self
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Append a box drawn on the canvas. Returns its index.
    pub fn add(&mut self, rect: Rect, color: Option<String>) -> usize {
        let color = color.unwrap_or_else(|| self.next_color());
        let mut b = self.to_image_space(&rect);
        b.color = color;
        self.boxes.push(b);
        self.boxes.len() - 1
    }

    /// Append a box already in image pixels.
    pub fn push(&mut self, b: BoundingBox) -> usize {
        self.boxes.push(b);
        self.boxes.len() - 1
    }

    pub fn move_to(&mut self, index: usize, x: i32, y: i32) -> Result<(), EditorError> {
        let b = self.get_mut(index)?;
        b.x = x;
        b.y = y;
        Ok(())
    }

    pub fn resize(&mut self, index: usize, width: u32, height: u32) -> Result<(), EditorError> {
        let b = self.get_mut(index)?;
        b.width = width;
        b.height = height;
        Ok(())
    }

    pub fn set_color(&mut self, index: usize, color: impl Into<String>) -> Result<(), EditorError> {
        self.get_mut(index)?.color = color.into();
        Ok(())
    }

    pub fn delete(&mut self, index: usize) -> Result<BoundingBox, EditorError> {
        self.check(index)?;
        Ok(self.boxes.remove(index))
    }

    pub fn clear(&mut self) {
        self.boxes.clear();
    }

    /// Copy of the current boxes in display order, ready for a schema record.
    pub fn confirm(&self) -> Vec<BoundingBox> {
        self.boxes.clone()
    }

    /// Bring the list in line with the geometry reported by the canvas after
    /// a redraw.
    pub fn reconcile(&mut self, canvas: &[Rect]) -> EditorChange {
        let incoming: Vec<BoundingBox> = canvas.iter().map(|r| self.to_image_space(r)).collect();
        let current = self.boxes.len();

        if incoming.len() == current {
            let differing: Vec<usize> = (0..current)
                .filter(|&i| !same_geometry(&self.boxes[i], &incoming[i]))
                .collect();
            return match differing.as_slice() {
                [] => EditorChange::Unchanged,
                [i] => {
                    copy_geometry(&mut self.boxes[*i], &incoming[*i]);
                    EditorChange::Updated(*i)
                }
                _ => self.replace(incoming),
            };
        }

        if incoming.len() == current + 1
            && self
                .boxes
                .iter()
                .zip(&incoming)
                .all(|(a, b)| same_geometry(a, b))
        {
            let mut added = incoming[current].clone();
            added.color = self.next_color();
            self.boxes.push(added);
            return EditorChange::Added(current);
        }

        if incoming.len() + 1 == current {
            let removed = (0..incoming.len())
                .find(|&i| !same_geometry(&self.boxes[i], &incoming[i]))
                .unwrap_or(incoming.len());
            let tail_matches = self.boxes[removed + 1..]
                .iter()
                .zip(&incoming[removed..])
                .all(|(a, b)| same_geometry(a, b));
            if tail_matches {
                self.boxes.remove(removed);
                return EditorChange::Removed(removed);
            }
        }

        self.replace(incoming)
    }

    fn replace(&mut self, incoming: Vec<BoundingBox>) -> EditorChange {
        let mut rebuilt = Vec::with_capacity(incoming.len());
        for (i, mut b) in incoming.into_iter().enumerate() {
            b.color = match self.boxes.get(i) {
                Some(old) => old.color.clone(),
                None => PALETTE[i % PALETTE.len()].to_string(),
            };
            rebuilt.push(b);
        }
        debug!(
            before = self.boxes.len(),
            after = rebuilt.len(),
            "canvas geometry replaced box list"
        );
        self.boxes = rebuilt;
        EditorChange::Replaced
    }

    fn next_color(&self) -> String {
        PALETTE[self.boxes.len() % PALETTE.len()].to_string()
    }

    fn to_image_space(&self, rect: &Rect) -> BoundingBox {
        BoundingBox {
            x: (rect.x * self.scale).round() as i32,
            y: (rect.y * self.scale).round() as i32,
            width: (rect.width * self.scale).max(0.0).round() as u32,
            height: (rect.height * self.scale).max(0.0).round() as u32,
            color: String::new(),
        }
    }

    fn check(&self, index: usize) -> Result<(), EditorError> {
        if index < self.boxes.len() {
            Ok(())
        } else {
            Err(EditorError::NoSuchBox {
                index,
                len: self.boxes.len(),
            })
        }
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut BoundingBox, EditorError> {
        self.check(index)?;
        Ok(&mut self.boxes[index])
    }
}

fn same_geometry(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.x == b.x && a.y == b.y && a.width == b.width && a.height == b.height
}

fn copy_geometry(dst: &mut BoundingBox, src: &BoundingBox) {
    dst.x = src.x;
    dst.y = src.y;
    dst.width = src.width;
    dst.height = src.height;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor_with(rects: &[Rect]) -> BoxEditor {
        let mut editor = BoxEditor::new();
        for r in rects {
            editor.add(*r, None);
        }
        editor
    }

    const A: Rect = Rect {
        x: 10.0,
        y: 10.0,
        width: 50.0,
        height: 50.0,
    };
    const B: Rect = Rect {
        x: 30.0,
        y: 30.0,
        width: 50.0,
        height: 50.0,
    };
    const C: Rect = Rect {
        x: 100.0,
        y: 5.0,
        width: 20.0,
        height: 40.0,
    };

    #[test]
    fn add_assigns_palette_colors_in_order() {
        let editor = editor_with(&[A, B, C]);
        let colors: Vec<&str> = editor.boxes().iter().map(|b| b.color.as_str()).collect();
        assert_eq!(colors, vec!["#FF0000", "#00FF00", "#0000FF"]);
    }

    #[test]
    fn explicit_color_wins() {
        let mut editor = BoxEditor::new();
        editor.add(A, Some("red".into()));
        assert_eq!(editor.confirm(), vec![BoundingBox::new(10, 10, 50, 50, "red")]);
    }

    #[test]
    fn overlapping_boxes_are_kept() {
        let editor = editor_with(&[A, A, B]);
        assert_eq!(editor.len(), 3);
        assert_eq!(editor.boxes()[0].x, editor.boxes()[1].x);
    }

    #[test]
    fn gestures_touch_only_their_box() {
        let mut editor = editor_with(&[A, B, C]);
        let before = editor.confirm();

        editor.move_to(1, 0, 0).unwrap();
        editor.resize(1, 5, 6).unwrap();
        editor.set_color(1, "orange").unwrap();

        let after = editor.confirm();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_eq!(after[1], BoundingBox::new(0, 0, 5, 6, "orange"));
    }

    #[test]
    fn delete_keeps_order_of_the_rest() {
        let mut editor = editor_with(&[A, B, C]);
        let removed = editor.delete(1).unwrap();
        assert_eq!(removed.x, 30);
        let xs: Vec<i32> = editor.boxes().iter().map(|b| b.x).collect();
        assert_eq!(xs, vec![10, 100]);
    }

    #[test]
    fn out_of_range_index_errors() {
        let mut editor = editor_with(&[A]);
        assert_eq!(
            editor.delete(3),
            Err(EditorError::NoSuchBox { index: 3, len: 1 })
        );
        assert!(editor.move_to(1, 0, 0).is_err());
    }

    #[test]
    fn scale_converts_to_image_pixels() {
        let mut editor = BoxEditor::new().scaled(2.0);
        editor.add(A, None);
        assert_eq!(editor.boxes()[0].width, 100);
        assert_eq!(editor.boxes()[0].x, 20);
    }

    #[test]
    fn reconcile_detects_single_gestures() {
        let mut editor = editor_with(&[A, B]);
        assert_eq!(editor.reconcile(&[A, B]), EditorChange::Unchanged);

        assert_eq!(editor.reconcile(&[A, B, C]), EditorChange::Added(2));
        assert_eq!(editor.boxes()[2].color, "#0000FF");

        let moved = Rect::new(31.0, 30.0, 50.0, 50.0);
        assert_eq!(editor.reconcile(&[A, moved, C]), EditorChange::Updated(1));
        assert_eq!(editor.boxes()[1].x, 31);
        assert_eq!(editor.boxes()[1].color, "#00FF00");

        assert_eq!(editor.reconcile(&[A, C]), EditorChange::Removed(1));
        let colors: Vec<&str> = editor.boxes().iter().map(|b| b.color.as_str()).collect();
        assert_eq!(colors, vec!["#FF0000", "#0000FF"]);
    }

    #[test]
    fn reconcile_removing_last_box() {
        let mut editor = editor_with(&[A, B]);
        assert_eq!(editor.reconcile(&[A]), EditorChange::Removed(1));
        assert_eq!(editor.len(), 1);
    }

    #[test]
    fn reconcile_falls_back_to_replace() {
        let mut editor = editor_with(&[A, B]);
        assert_eq!(editor.reconcile(&[C, C]), EditorChange::Replaced);
        assert_eq!(editor.boxes()[0].x, 100);
        assert_eq!(editor.boxes()[0].color, "#FF0000");
        assert_eq!(editor.boxes()[1].color, "#00FF00");

        assert_eq!(editor.reconcile(&[]), EditorChange::Replaced);
        assert!(editor.is_empty());
    }
}
