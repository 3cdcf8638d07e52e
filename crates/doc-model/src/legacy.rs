//! Versioned read path for annotation files
//!
//! The original client stored annotations as loosely-typed JSON rows: a
//! `kind` string, positions as bare fields, drawing paths as `[x, y]`
//! pairs, colors as hex strings, and evidence links smuggled inside note
//! content behind a `LINK:` marker. Everything is normalized to the
//! current model here, at the boundary; nothing downstream ever sees the
//! old shape.

use crate::{
    Annotation, AnnotationBody, AnnotationId, Color, ModelError, PercentPoint, MAX_SCALE,
    MIN_SCALE,
};
use serde::{Deserialize, Serialize};

/// Marker the old client prefixed onto evidence-link note content
pub const LEGACY_LINK_MARKER: &str = "LINK:";

const FILE_SCHEMA_VERSION: u32 = 1;

/// One annotation row as the old client wrote it
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyAnnotation {
    #[serde(default)]
    pub id: Option<AnnotationId>,
    pub kind: String,
    pub page: u32,
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub path: Option<Vec<[f32; 2]>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(rename = "strokeWidth", default)]
    pub stroke_width: Option<f32>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<i64>,
}

fn default_scale() -> f32 {
    1.0
}

/// Normalize one legacy row into the current model
pub fn upgrade(legacy: LegacyAnnotation) -> Result<Annotation, ModelError> {
    let position = PercentPoint::new(legacy.x, legacy.y);

    let body = match legacy.kind.as_str() {
        "signature" => AnnotationBody::Signature,
        "drawing" => {
            let points: Vec<PercentPoint> = legacy
                .path
                .unwrap_or_default()
                .into_iter()
                .map(|[x, y]| PercentPoint::new(x, y))
                .collect();
            if points.len() < 2 {
                return Err(ModelError::DrawingTooShort { points: points.len() });
            }
            let color = legacy
                .color
                .as_deref()
                .and_then(Color::from_hex)
                .unwrap_or(Color::BLACK);
            AnnotationBody::Drawing {
                path: points,
                color,
                stroke_width: legacy.stroke_width.unwrap_or(2.0).max(0.1),
            }
        }
        "note" => {
            let text = legacy.content.unwrap_or_default();
            match text.strip_prefix(LEGACY_LINK_MARKER) {
                Some(rest) => parse_link_summary(rest.trim()),
                None => AnnotationBody::Note { text },
            }
        }
        other => return Err(ModelError::UnknownKind(other.to_owned())),
    };

    Ok(Annotation {
        id: legacy.id.unwrap_or_else(AnnotationId::new_v4),
        page: legacy.page,
        position,
        scale: legacy.scale.clamp(MIN_SCALE, MAX_SCALE),
        body,
        created_at: legacy.created_at.unwrap_or_else(crate::unix_now),
    })
}

/// Recover structure from a `LINK: Category (N students)` summary
///
/// Best effort: an unparsable summary keeps its text as the category with
/// a zero subject count rather than failing the whole file.
fn parse_link_summary(summary: &str) -> AnnotationBody {
    let (category, subject_count) = match summary.rsplit_once(" (") {
        Some((category, rest)) => {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            (category.trim().to_owned(), digits.parse().unwrap_or(0))
        }
        None => (summary.to_owned(), 0),
    };

    AnnotationBody::EvidenceLink { category, subject_count, summary: summary.to_owned() }
}

#[derive(Debug, Serialize)]
struct AnnotationEnvelope<'a> {
    version: u32,
    annotations: &'a [Annotation],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnnotationFileShape {
    Envelope {
        #[allow(dead_code)]
        version: u32,
        annotations: Vec<Annotation>,
    },
    Legacy(Vec<LegacyAnnotation>),
}

/// Read an annotation file, accepting both the current envelope and the
/// old client's bare array
pub fn parse_annotation_file(json: &str) -> Result<Vec<Annotation>, ModelError> {
    match serde_json::from_str::<AnnotationFileShape>(json)? {
        AnnotationFileShape::Envelope { annotations, .. } => Ok(annotations),
        AnnotationFileShape::Legacy(rows) => rows.into_iter().map(upgrade).collect(),
    }
}

/// Serialize annotations in the current envelope format
pub fn write_annotation_file(annotations: &[Annotation]) -> Result<String, ModelError> {
    let envelope = AnnotationEnvelope { version: FILE_SCHEMA_VERSION, annotations };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_tagged_note_into_evidence_link() {
        let legacy = LegacyAnnotation {
            id: None,
            kind: "note".to_owned(),
            page: 2,
            x: 80.0,
            y: 90.0,
            scale: 1.0,
            content: Some("LINK: Differentiation (2 students)".to_owned()),
            path: None,
            color: None,
            stroke_width: None,
            created_at: Some(1_700_000_000),
        };

        let upgraded = upgrade(legacy).expect("upgrade should succeed");
        match upgraded.body {
            AnnotationBody::EvidenceLink { category, subject_count, summary } => {
                assert_eq!(category, "Differentiation");
                assert_eq!(subject_count, 2);
                assert_eq!(summary, "Differentiation (2 students)");
            }
            other => panic!("expected evidence link, got {other:?}"),
        }
        assert_eq!(upgraded.created_at, 1_700_000_000);
    }

    #[test]
    fn plain_note_stays_a_note() {
        let legacy = LegacyAnnotation {
            id: None,
            kind: "note".to_owned(),
            page: 1,
            x: 10.0,
            y: 10.0,
            scale: 1.0,
            content: Some("Great progress this term".to_owned()),
            path: None,
            color: None,
            stroke_width: None,
            created_at: None,
        };

        let upgraded = upgrade(legacy).expect("upgrade should succeed");
        assert!(matches!(upgraded.body, AnnotationBody::Note { .. }));
    }

    #[test]
    fn upgrades_drawing_with_hex_color() {
        let legacy = LegacyAnnotation {
            id: None,
            kind: "drawing".to_owned(),
            page: 1,
            x: 10.0,
            y: 10.0,
            scale: 2.0,
            content: None,
            path: Some(vec![[10.0, 10.0], [20.0, 20.0], [30.0, 10.0]]),
            color: Some("#ff0000".to_owned()),
            stroke_width: Some(3.0),
            created_at: None,
        };

        let upgraded = upgrade(legacy).expect("upgrade should succeed");
        match upgraded.body {
            AnnotationBody::Drawing { path, color, stroke_width } => {
                assert_eq!(path.len(), 3);
                assert_eq!(color, Color::RED);
                assert_eq!(stroke_width, 3.0);
            }
            other => panic!("expected drawing, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let legacy = LegacyAnnotation {
            id: None,
            kind: "sticker".to_owned(),
            page: 1,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            content: None,
            path: None,
            color: None,
            stroke_width: None,
            created_at: None,
        };

        assert!(matches!(upgrade(legacy), Err(ModelError::UnknownKind(_))));
    }

    #[test]
    fn file_reader_accepts_both_shapes() {
        let legacy_json = r#"[
            {"kind": "signature", "page": 1, "x": 50.0, "y": 50.0},
            {"kind": "note", "page": 1, "x": 10.0, "y": 10.0, "content": "hello"}
        ]"#;
        let from_legacy = parse_annotation_file(legacy_json).expect("legacy array should parse");
        assert_eq!(from_legacy.len(), 2);
        assert!(matches!(from_legacy[0].body, AnnotationBody::Signature));

        let written = write_annotation_file(&from_legacy).expect("write should succeed");
        let from_envelope = parse_annotation_file(&written).expect("envelope should parse");
        assert_eq!(from_envelope, from_legacy);
    }

    #[test]
    fn unparsable_link_summary_degrades_to_category_text() {
        let body = parse_link_summary("Behaviour follow-up");
        match body {
            AnnotationBody::EvidenceLink { category, subject_count, .. } => {
                assert_eq!(category, "Behaviour follow-up");
                assert_eq!(subject_count, 0);
            }
            other => panic!("expected evidence link, got {other:?}"),
        }
    }
}
