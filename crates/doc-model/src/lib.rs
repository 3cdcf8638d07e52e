//! Annotation and program record data model
//!
//! Positions are stored as percentages of page width/height (0-100) so an
//! annotation renders at the same spot regardless of viewer zoom. The
//! vertical axis follows UI convention (origin top-left); the finalize
//! engine flips it into PDF page space.

use serde::{Deserialize, Serialize};

pub mod legacy;

/// Unique identifier for an annotation
///
/// Stable across the document lifetime, persists in saved files.
pub type AnnotationId = uuid::Uuid;

/// Lower bound for annotation scale. Smaller values render degenerately.
pub const MIN_SCALE: f32 = 0.2;
/// Upper bound for annotation scale.
pub const MAX_SCALE: f32 = 5.0;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("drawing path has {points} point(s), need at least 2")]
    DrawingTooShort { points: usize },
    #[error("program is already finalized")]
    AlreadyFinalized,
    #[error("unknown annotation kind {0:?}")]
    UnknownKind(String),
    #[error("annotation file unreadable: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Position on a page as percentages of page width/height
///
/// Components are clamped into [0, 100] on construction; drag overshoot
/// is tolerated, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f32,
    pub y: f32,
}

impl PercentPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x: x.clamp(0.0, 100.0), y: y.clamp(0.0, 100.0) }
    }
}

/// Opaque RGB stroke color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a `#rrggbb` hex string
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self { r, g, b })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Convert to normalized RGB values (0.0 to 1.0) for PDF operators
    pub fn to_normalized(&self) -> (f32, f32, f32) {
        (self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0)
    }
}

/// Kind-specific annotation payload
///
/// Evidence links carry structured fields rather than a marker prefix
/// inside note text, so render and finalize code match on the variant
/// instead of parsing strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AnnotationBody {
    Signature,
    Note {
        text: String,
    },
    Drawing {
        path: Vec<PercentPoint>,
        color: Color,
        stroke_width: f32,
    },
    EvidenceLink {
        category: String,
        subject_count: usize,
        summary: String,
    },
}

impl AnnotationBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AnnotationBody::Signature => "signature",
            AnnotationBody::Note { .. } => "note",
            AnnotationBody::Drawing { .. } => "drawing",
            AnnotationBody::EvidenceLink { .. } => "evidence-link",
        }
    }
}

/// A positioned, typed mark on one document page
///
/// Page numbers are 1-based. List position within a page is insertion
/// order and doubles as z-order (later annotations draw on top).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub page: u32,
    pub position: PercentPoint,
    pub scale: f32,
    pub body: AnnotationBody,
    pub created_at: i64,
}

impl Annotation {
    fn with_body(page: u32, position: PercentPoint, body: AnnotationBody) -> Self {
        Self {
            id: AnnotationId::new_v4(),
            page,
            position,
            scale: 1.0,
            body,
            created_at: unix_now(),
        }
    }

    pub fn signature(page: u32, position: PercentPoint) -> Self {
        Self::with_body(page, position, AnnotationBody::Signature)
    }

    pub fn note(page: u32, position: PercentPoint, text: impl Into<String>) -> Self {
        Self::with_body(page, position, AnnotationBody::Note { text: text.into() })
    }

    pub fn evidence_link(
        page: u32,
        position: PercentPoint,
        category: impl Into<String>,
        subject_count: usize,
    ) -> Self {
        let category = category.into();
        let summary = format!("{category} ({subject_count} students)");
        Self::with_body(
            page,
            position,
            AnnotationBody::EvidenceLink { category, subject_count, summary },
        )
    }

    /// Create a freehand drawing annotation
    ///
    /// The path must contain at least two points; a single-point gesture
    /// is not a drawing. The first path point becomes the position anchor.
    pub fn drawing(
        page: u32,
        path: Vec<PercentPoint>,
        color: Color,
        stroke_width: f32,
    ) -> Result<Self, ModelError> {
        if path.len() < 2 {
            return Err(ModelError::DrawingTooShort { points: path.len() });
        }
        let anchor = path[0];
        Ok(Self::with_body(
            page,
            anchor,
            AnnotationBody::Drawing { path, color, stroke_width: stroke_width.max(0.1) },
        ))
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.body.kind_name()
    }
}

/// Current Unix timestamp in seconds
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Opaque identifier into the external blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId(pub String);

impl BlobId {
    /// Generate a fresh, never-before-used id
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document in the blob store plus its human-readable name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub blob: BlobId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgramStatus {
    Active,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub u64);

/// A program document under annotation
///
/// Owns its annotation list exclusively. Mutable only while `Active`;
/// `mark_finalized` is a one-way transition after which the record is
/// read-only and a distinct finalized document reference exists alongside
/// the untouched original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub id: ProgramId,
    pub name: String,
    pub class_name: String,
    pub document: Option<DocumentRef>,
    pub annotations: Vec<Annotation>,
    pub status: ProgramStatus,
    pub finalized_document: Option<DocumentRef>,
}

impl ProgramRecord {
    pub fn new(
        id: ProgramId,
        name: impl Into<String>,
        class_name: impl Into<String>,
        document: Option<DocumentRef>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            class_name: class_name.into(),
            document,
            annotations: Vec::new(),
            status: ProgramStatus::Active,
            finalized_document: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProgramStatus::Active
    }

    /// Annotations on one page, in insertion (= z) order
    pub fn annotations_for_page(&self, page: u32) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.page == page)
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    /// One-way transition to `Finalized`, attaching the flattened document
    ///
    /// Rejects a second call; the first success wins.
    pub fn mark_finalized(&mut self, finalized: DocumentRef) -> Result<(), ModelError> {
        if self.status == ProgramStatus::Finalized {
            return Err(ModelError::AlreadyFinalized);
        }
        self.status = ProgramStatus::Finalized;
        self.finalized_document = Some(finalized);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub u64);

/// A subject (student) known to the external registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
}

/// Timestamped audit record written against a subject by the evidence linker
///
/// Carries a back-reference to the originating document and page for
/// traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLogEntry {
    pub subject: SubjectId,
    pub category: String,
    pub note: String,
    pub document: Option<BlobId>,
    pub page: u32,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_point_clamps_overshoot() {
        let p = PercentPoint::new(-3.0, 112.5);
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 100.0);
    }

    #[test]
    fn color_hex_round_trip() {
        let color = Color::from_hex("#ff007f").expect("hex should parse");
        assert_eq!(color, Color::rgb(255, 0, 127));
        assert_eq!(color.to_hex(), "#ff007f");

        assert!(Color::from_hex("ff0000").is_none());
        assert!(Color::from_hex("#ff00").is_none());
    }

    #[test]
    fn scale_is_clamped_to_sane_range() {
        let note = Annotation::note(1, PercentPoint::new(10.0, 10.0), "hi");
        assert_eq!(note.clone().with_scale(0.01).scale, MIN_SCALE);
        assert_eq!(note.with_scale(99.0).scale, MAX_SCALE);
    }

    #[test]
    fn single_point_drawing_is_rejected() {
        let err = Annotation::drawing(1, vec![PercentPoint::new(5.0, 5.0)], Color::RED, 2.0)
            .expect_err("one-point path must not become a drawing");
        assert!(matches!(err, ModelError::DrawingTooShort { points: 1 }));
    }

    #[test]
    fn drawing_anchors_at_first_path_point() {
        let path = vec![PercentPoint::new(10.0, 20.0), PercentPoint::new(30.0, 40.0)];
        let drawing = Annotation::drawing(2, path, Color::RED, 2.0).expect("two points suffice");
        assert_eq!(drawing.position, PercentPoint::new(10.0, 20.0));
        assert_eq!(drawing.page, 2);
    }

    #[test]
    fn evidence_link_builds_summary() {
        let link = Annotation::evidence_link(3, PercentPoint::new(80.0, 90.0), "Differentiation", 2);
        match &link.body {
            AnnotationBody::EvidenceLink { category, subject_count, summary } => {
                assert_eq!(category, "Differentiation");
                assert_eq!(*subject_count, 2);
                assert_eq!(summary, "Differentiation (2 students)");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn annotations_for_page_preserves_insertion_order() {
        let mut record = ProgramRecord::new(ProgramId(1), "Report", "7A", None);
        record.annotations.push(Annotation::note(1, PercentPoint::new(1.0, 1.0), "a"));
        record.annotations.push(Annotation::note(2, PercentPoint::new(2.0, 2.0), "other page"));
        record.annotations.push(Annotation::note(1, PercentPoint::new(3.0, 3.0), "b"));

        let texts: Vec<_> = record
            .annotations_for_page(1)
            .map(|a| match &a.body {
                AnnotationBody::Note { text } => text.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn finalize_transition_is_one_way() {
        let mut record = ProgramRecord::new(ProgramId(7), "Report", "7A", None);
        let doc = DocumentRef { blob: BlobId::fresh(), name: "final.pdf".to_owned() };

        record.mark_finalized(doc.clone()).expect("first transition succeeds");
        assert_eq!(record.status, ProgramStatus::Finalized);
        assert_eq!(record.finalized_document.as_ref(), Some(&doc));

        let again = DocumentRef { blob: BlobId::fresh(), name: "again.pdf".to_owned() };
        let err = record.mark_finalized(again).expect_err("second transition must fail");
        assert!(matches!(err, ModelError::AlreadyFinalized));
    }

    #[test]
    fn annotation_serde_round_trip() {
        let drawing = Annotation::drawing(
            1,
            vec![PercentPoint::new(10.0, 10.0), PercentPoint::new(20.0, 20.0)],
            Color::RED,
            2.0,
        )
        .expect("valid drawing");

        let json = serde_json::to_string(&drawing).expect("serialize");
        let back: Annotation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, drawing);
        assert!(json.contains("\"kind\":\"drawing\""));
    }
}
