//! In-place application of an expansion to a host surface.
//!
//! Three host categories exist: plain `input` elements, `textarea`s, and
//! `contenteditable` regions. The first two are value splices over a
//! string; the third is an explicit split-and-splice over a node+offset
//! address in a headless DOM model, so the operation stays testable
//! without a browser.

use tracing::debug;

use crate::errors::ClipioError;
use crate::expander::Expanded;
use crate::Result;

/// Plain-text host element categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Input,
    Textarea,
}

/// Notifications the host must dispatch after a splice so the page's own
/// reactive bindings observe the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticEvent {
    Input,
    Change,
}

/// Host model of an input/textarea: its value, caret (character offset)
/// and focus state, plus the synthetic events queued by a splice.
#[derive(Debug, Clone)]
pub struct TextField {
    pub kind: FieldKind,
    pub value: String,
    pub caret: usize,
    pub focused: bool,
    events: Vec<SyntheticEvent>,
}

impl TextField {
    pub fn new(kind: FieldKind, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            caret: value.chars().count(),
            focused: true,
            events: Vec::new(),
        }
    }

    /// Drain the queued synthetic events for dispatch.
    pub fn take_events(&mut self) -> Vec<SyntheticEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Replace the character span `start..end` of the field value with the
/// expanded content, then place the caret at `start + cursor_offset` (end
/// of the insertion when the expansion carried no cursor token) and
/// restore focus.
pub fn apply_to_field(field: &mut TextField, start: usize, end: usize, expanded: &Expanded) {
    let chars: Vec<char> = field.value.chars().collect();
    let end = end.min(chars.len());
    let start = start.min(end);

    let before: String = chars[..start].iter().collect();
    let after: String = chars[end..].iter().collect();
    field.value = format!("{before}{}{after}", expanded.text);

    let inserted = expanded.text.chars().count();
    let offset = expanded.cursor_offset.unwrap_or(inserted).min(inserted);
    field.caret = start + offset;

    field.events.push(SyntheticEvent::Input);
    field.events.push(SyntheticEvent::Change);
    field.focused = true;
}

/// Minimal DOM node model for contenteditable splicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomNode {
    Text(String),
    Element { tag: String, children: Vec<DomNode> },
}

impl DomNode {
    pub fn text(text: &str) -> Self {
        DomNode::Text(text.to_string())
    }

    pub fn element(tag: &str, children: Vec<DomNode>) -> Self {
        DomNode::Element {
            tag: tag.to_string(),
            children,
        }
    }

    /// Concatenated text of the node and its descendants.
    pub fn text_content(&self) -> String {
        match self {
            DomNode::Text(text) => text.clone(),
            DomNode::Element { children, .. } => {
                children.iter().map(DomNode::text_content).collect()
            }
        }
    }
}

/// Converts markdown snippet content into DOM fragment nodes. The real
/// conversion lives in the editor/serialization layer; this seam lets the
/// applier stay independent of it.
pub trait RichContentRenderer {
    fn render(&self, markdown: &str) -> Vec<DomNode>;
}

/// Fallback renderer: a single text node, markdown left as-is.
pub struct PlainTextRenderer;

impl RichContentRenderer for PlainTextRenderer {
    fn render(&self, markdown: &str) -> Vec<DomNode> {
        if markdown.is_empty() {
            Vec::new()
        } else {
            vec![DomNode::text(markdown)]
        }
    }
}

/// Address of the matched span: the index of a text-node child under the
/// contenteditable parent, and the character span within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAddress {
    pub child: usize,
    pub start: usize,
    pub end: usize,
}

/// Where the caret landed after a contenteditable splice: a child index
/// under the parent and a character offset within that child (0 for
/// element children).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaretPosition {
    pub child: usize,
    pub offset: usize,
}

/// Replace the span addressed by `addr` inside a contenteditable parent:
/// split the text node into leading text, the rendered fragment and
/// trailing text, and swap that sequence in.
///
/// Caret restoration here is best-effort by contract: when the fragment is
/// a single text node the caret honors `cursor_offset` exactly; otherwise
/// it lands at the end of the inserted fragment, since an exact offset may
/// fall inside a rendered element.
pub fn apply_to_editable(
    parent: &mut DomNode,
    addr: NodeAddress,
    expanded: &Expanded,
    renderer: &dyn RichContentRenderer,
) -> Result<CaretPosition> {
    let DomNode::Element { children, .. } = parent else {
        return Err(ClipioError::ApplyTarget("parent is not an element".into()));
    };
    let Some(DomNode::Text(original)) = children.get(addr.child) else {
        return Err(ClipioError::ApplyTarget(format!(
            "child {} is not a text node",
            addr.child
        )));
    };

    let chars: Vec<char> = original.chars().collect();
    if addr.end > chars.len() || addr.start > addr.end {
        return Err(ClipioError::ApplyTarget(format!(
            "span {}..{} out of bounds for text node of length {}",
            addr.start,
            addr.end,
            chars.len()
        )));
    }

    let before: String = chars[..addr.start].iter().collect();
    let after: String = chars[addr.end..].iter().collect();
    let fragment = renderer.render(&expanded.text);

    let mut replacement: Vec<DomNode> = Vec::with_capacity(fragment.len() + 2);
    if !before.is_empty() {
        replacement.push(DomNode::Text(before));
    }
    let fragment_start = addr.child + replacement.len();
    let fragment_len = fragment.len();
    replacement.extend(fragment);
    if !after.is_empty() {
        replacement.push(DomNode::Text(after));
    }

    let caret = caret_after_insert(&replacement, fragment_start - addr.child, fragment_len, expanded)
        .map(|(child, offset)| CaretPosition {
            child: addr.child + child,
            offset,
        })
        .unwrap_or(CaretPosition {
            child: fragment_start,
            offset: 0,
        });

    children.splice(addr.child..=addr.child, replacement);
    Ok(caret)
}

fn caret_after_insert(
    replacement: &[DomNode],
    fragment_start: usize,
    fragment_len: usize,
    expanded: &Expanded,
) -> Option<(usize, usize)> {
    if fragment_len == 0 {
        return None;
    }
    if fragment_len == 1 {
        if let DomNode::Text(text) = &replacement[fragment_start] {
            let len = text.chars().count();
            let offset = expanded.cursor_offset.unwrap_or(len).min(len);
            return Some((fragment_start, offset));
        }
    }
    // Fragment spans elements: settle for the end of the last inserted node.
    let last = fragment_start + fragment_len - 1;
    let offset = match &replacement[last] {
        DomNode::Text(text) => text.chars().count(),
        DomNode::Element { .. } => 0,
    };
    debug!("cursor offset falls inside rich fragment, placing caret at fragment end");
    Some((last, offset))
}

/// Screen-space rectangle, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Host-side geometry: the caret rectangle comes from a selection range
/// (contenteditable) or a mirror-element measurement (input/textarea),
/// either of which may fail.
pub trait CaretRectSource {
    fn caret_rect(&self) -> Option<Rect>;
    fn element_rect(&self) -> Rect;
}

/// Screen anchor for the post-expansion feedback animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackAnchor {
    pub x: f32,
    pub y: f32,
}

/// Resolve the feedback anchor. A missing caret rectangle must never block
/// the expansion, so it degrades to the element's bounding-box center.
pub fn feedback_anchor(source: &dyn CaretRectSource) -> FeedbackAnchor {
    match source.caret_rect() {
        Some(rect) => FeedbackAnchor {
            x: rect.x,
            y: rect.y + rect.height,
        },
        None => {
            debug!("caret rect unavailable, anchoring feedback at element center");
            let (x, y) = source.element_rect().center();
            FeedbackAnchor { x, y }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expanded(text: &str, cursor_offset: Option<usize>) -> Expanded {
        Expanded {
            text: text.to_string(),
            cursor_offset,
        }
    }

    #[test]
    fn field_splice_replaces_span_and_moves_caret_to_end() {
        let mut field = TextField::new(FieldKind::Input, "hi ;gr");
        apply_to_field(&mut field, 3, 6, &expanded("greetings", None));
        assert_eq!(field.value, "hi greetings");
        assert_eq!(field.caret, 12);
        assert!(field.focused);
    }

    #[test]
    fn field_splice_honors_cursor_offset() {
        let mut field = TextField::new(FieldKind::Textarea, "x ;sig tail");
        apply_to_field(&mut field, 2, 6, &expanded("Hello !", Some(6)));
        assert_eq!(field.value, "x Hello ! tail");
        assert_eq!(field.caret, 8);
    }

    #[test]
    fn field_splice_queues_input_and_change_events() {
        let mut field = TextField::new(FieldKind::Input, ";gr");
        apply_to_field(&mut field, 0, 3, &expanded("greetings", None));
        assert_eq!(
            field.take_events(),
            vec![SyntheticEvent::Input, SyntheticEvent::Change]
        );
        assert!(field.take_events().is_empty());
    }

    #[test]
    fn field_splice_clamps_out_of_range_cursor_offset() {
        let mut field = TextField::new(FieldKind::Input, ";gr");
        apply_to_field(&mut field, 0, 3, &expanded("hi", Some(99)));
        assert_eq!(field.caret, 2);
    }

    #[test]
    fn editable_splice_builds_three_part_replacement() {
        let mut parent = DomNode::element("div", vec![DomNode::text("hi ;gr tail")]);
        let addr = NodeAddress { child: 0, start: 3, end: 6 };
        let caret = apply_to_editable(
            &mut parent,
            addr,
            &expanded("greetings", None),
            &PlainTextRenderer,
        )
        .unwrap();
        assert_eq!(
            parent,
            DomNode::element(
                "div",
                vec![
                    DomNode::text("hi "),
                    DomNode::text("greetings"),
                    DomNode::text(" tail"),
                ]
            )
        );
        assert_eq!(caret, CaretPosition { child: 1, offset: 9 });
        assert_eq!(parent.text_content(), "hi greetings tail");
    }

    #[test]
    fn editable_splice_at_node_start_omits_empty_leading_text() {
        let mut parent = DomNode::element("div", vec![DomNode::text(";gr tail")]);
        let addr = NodeAddress { child: 0, start: 0, end: 3 };
        let caret = apply_to_editable(
            &mut parent,
            addr,
            &expanded("greetings", Some(5)),
            &PlainTextRenderer,
        )
        .unwrap();
        assert_eq!(
            parent,
            DomNode::element(
                "div",
                vec![DomNode::text("greetings"), DomNode::text(" tail")]
            )
        );
        assert_eq!(caret, CaretPosition { child: 0, offset: 5 });
    }

    #[test]
    fn editable_splice_with_rich_fragment_parks_caret_at_fragment_end() {
        struct BoldRenderer;
        impl RichContentRenderer for BoldRenderer {
            fn render(&self, markdown: &str) -> Vec<DomNode> {
                vec![
                    DomNode::element("strong", vec![DomNode::text(markdown)]),
                    DomNode::text("!"),
                ]
            }
        }

        let mut parent = DomNode::element("div", vec![DomNode::text("a ;b c")]);
        let addr = NodeAddress { child: 0, start: 2, end: 4 };
        let caret =
            apply_to_editable(&mut parent, addr, &expanded("bold", Some(1)), &BoldRenderer)
                .unwrap();
        // leading "a ", <strong>, "!", trailing " c"
        assert_eq!(caret, CaretPosition { child: 2, offset: 1 });
        assert_eq!(parent.text_content(), "a bold! c");
    }

    #[test]
    fn editable_splice_rejects_non_text_target() {
        let mut parent = DomNode::element("div", vec![DomNode::element("br", vec![])]);
        let addr = NodeAddress { child: 0, start: 0, end: 0 };
        let result =
            apply_to_editable(&mut parent, addr, &expanded("x", None), &PlainTextRenderer);
        assert!(result.is_err());
    }

    #[test]
    fn editable_splice_rejects_out_of_bounds_span() {
        let mut parent = DomNode::element("div", vec![DomNode::text("ab")]);
        let addr = NodeAddress { child: 0, start: 1, end: 5 };
        assert!(
            apply_to_editable(&mut parent, addr, &expanded("x", None), &PlainTextRenderer)
                .is_err()
        );
    }

    #[test]
    fn feedback_anchor_prefers_caret_rect() {
        struct WithCaret;
        impl CaretRectSource for WithCaret {
            fn caret_rect(&self) -> Option<Rect> {
                Some(Rect { x: 10.0, y: 20.0, width: 1.0, height: 14.0 })
            }
            fn element_rect(&self) -> Rect {
                Rect { x: 0.0, y: 0.0, width: 100.0, height: 40.0 }
            }
        }
        let anchor = feedback_anchor(&WithCaret);
        assert_eq!(anchor, FeedbackAnchor { x: 10.0, y: 34.0 });
    }

    #[test]
    fn feedback_anchor_falls_back_to_element_center() {
        struct NoCaret;
        impl CaretRectSource for NoCaret {
            fn caret_rect(&self) -> Option<Rect> {
                None
            }
            fn element_rect(&self) -> Rect {
                Rect { x: 0.0, y: 0.0, width: 100.0, height: 40.0 }
            }
        }
        let anchor = feedback_anchor(&NoCaret);
        assert_eq!(anchor, FeedbackAnchor { x: 50.0, y: 20.0 });
    }
}
