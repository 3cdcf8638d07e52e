//! Finalization: bake annotations into a new immutable PDF
//!
//! The original bytes are never modified; the flattened result is stored
//! under a fresh blob id and the program record flips to `Finalized` only
//! after everything succeeded. Failures are stage-named (load / embed /
//! save) and leave no partial state behind.

use crate::content::{
    self, PageFrame, SIGNATURE_BOX_HEIGHT_PT, SIGNATURE_MAX_WIDTH_PT,
};
use blob_store::BlobStore;
use doc_model::{
    Annotation, AnnotationBody, BlobId, DocumentRef, ProgramId, ProgramRecord,
};
use log::warn;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashSet};

/// Resource names for the overlay font and signature image
const FONT_NAME: &str = "MbF1";
const SIGNATURE_XOBJECT_NAME: &str = "MbSig";

/// Global context for a finalize run
#[derive(Debug, Clone, Default)]
pub struct FinalizeContext {
    /// Name rendered as `Signed: {name}` when no image is available
    pub signer_name: String,
    /// Encoded signature image (PNG or any format the image crate reads)
    pub signature_image: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("program has no backing document to finalize")]
    MissingDocument,
    #[error("program is already finalized")]
    AlreadyFinalized,
    #[error("a finalize is already running for this program")]
    InFlight,
    #[error("load failed: {0}")]
    Load(String),
    #[error("embed failed: {0}")]
    Embed(String),
    #[error("save failed: {0}")]
    Save(String),
}

/// Guards against two finalize runs racing on the same record
///
/// The UI must call `try_begin` before starting the asynchronous run and
/// `finish` when it completes either way.
#[derive(Debug, Default)]
pub struct FinalizeGate {
    in_flight: HashSet<ProgramId>,
}

impl FinalizeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&mut self, program: ProgramId) -> bool {
        self.in_flight.insert(program)
    }

    pub fn is_running(&self, program: ProgramId) -> bool {
        self.in_flight.contains(&program)
    }

    pub fn finish(&mut self, program: ProgramId) {
        self.in_flight.remove(&program);
    }
}

/// Re-render every annotation as permanent page content
///
/// Annotations are processed in stored (page, insertion) order, which
/// preserves z-order in the output. An annotation pointing past the last
/// page is skipped with a warning; the document may have been replaced
/// since the annotation was made.
pub fn flatten_document(
    original: &[u8],
    annotations: &[Annotation],
    ctx: &FinalizeContext,
) -> Result<Vec<u8>, FinalizeError> {
    let mut doc =
        Document::load_mem(original).map_err(|err| FinalizeError::Load(err.to_string()))?;

    let pages = doc.get_pages();
    let page_count = pages.len() as u32;
    if page_count == 0 {
        return Err(FinalizeError::Load("document has no pages".to_owned()));
    }

    let mut by_page: BTreeMap<u32, Vec<&Annotation>> = BTreeMap::new();
    for annotation in annotations {
        if annotation.page == 0 || annotation.page > page_count {
            warn!(
                "skipping annotation {} on page {} (document has {} pages)",
                annotation.id, annotation.page, page_count
            );
            continue;
        }
        by_page.entry(annotation.page).or_default().push(annotation);
    }

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    // Decode the signature image once; unreadable bytes degrade to the
    // text fallback instead of failing the run.
    let signature_image = ctx.signature_image.as_deref().and_then(|bytes| {
        match image::load_from_memory(bytes) {
            Ok(decoded) => Some(decoded.to_rgb8()),
            Err(err) => {
                warn!("signature image unreadable ({err}); using text fallback");
                None
            }
        }
    });
    let signature_xobject = signature_image.map(|rgb| {
        let (width, height) = rgb.dimensions();
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb.into_raw(),
        );
        (doc.add_object(stream), width as f32, height as f32)
    });

    for (page_no, page_annotations) in by_page {
        let page_id = *pages
            .get(&page_no)
            .ok_or_else(|| FinalizeError::Embed(format!("page {page_no} unresolvable")))?;
        let frame = page_frame(&doc, page_id);

        let mut ops: Vec<Operation> = Vec::new();
        let mut uses_font = false;
        let mut uses_signature_image = false;

        for annotation in page_annotations {
            let mut body_ops = match &annotation.body {
                AnnotationBody::Drawing { path, color, stroke_width } => {
                    if path.len() < 2 {
                        warn!("skipping drawing {} with degenerate path", annotation.id);
                        continue;
                    }
                    content::polyline_ops(frame, path, *color, stroke_width * annotation.scale)
                }
                AnnotationBody::Signature => match signature_xobject {
                    Some((_, width, height)) => {
                        uses_signature_image = true;
                        let (draw_w, draw_h) = content::fit_within(
                            width,
                            height,
                            SIGNATURE_MAX_WIDTH_PT,
                            SIGNATURE_BOX_HEIGHT_PT * annotation.scale,
                        );
                        content::image_ops(
                            frame,
                            annotation.position,
                            SIGNATURE_XOBJECT_NAME,
                            draw_w,
                            draw_h,
                        )
                    }
                    None => {
                        uses_font = true;
                        content::signature_text_ops(
                            frame,
                            annotation.position,
                            &ctx.signer_name,
                            annotation.scale,
                            FONT_NAME,
                        )
                    }
                },
                AnnotationBody::EvidenceLink { summary, .. } => {
                    uses_font = true;
                    let label = format!("Evidence: {summary}");
                    content::badge_ops(frame, annotation.position, &label, annotation.scale, FONT_NAME)
                }
                AnnotationBody::Note { text } => {
                    uses_font = true;
                    content::note_ops(frame, annotation.position, text, annotation.scale, FONT_NAME)
                }
            };

            ops.push(Operation::new("q", vec![]));
            ops.append(&mut body_ops);
            ops.push(Operation::new("Q", vec![]));
        }

        if ops.is_empty() {
            continue;
        }

        if uses_font {
            add_font_to_page(&mut doc, page_id, font_id)
                .map_err(|err| FinalizeError::Embed(err.to_string()))?;
        }
        if uses_signature_image {
            if let Some((xobject_id, _, _)) = signature_xobject {
                doc.add_xobject(page_id, SIGNATURE_XOBJECT_NAME, xobject_id)
                    .map_err(|err| FinalizeError::Embed(err.to_string()))?;
            }
        }

        let overlay = Content { operations: ops }
            .encode()
            .map_err(|err| FinalizeError::Embed(err.to_string()))?;
        let existing = doc
            .get_page_content(page_id)
            .map_err(|err| FinalizeError::Embed(err.to_string()))?;

        // Isolate the original content's graphics state before drawing
        // the overlay on top of it.
        let mut combined = Vec::with_capacity(existing.len() + overlay.len() + 8);
        combined.extend_from_slice(b"q\n");
        combined.extend_from_slice(&existing);
        combined.extend_from_slice(b"\nQ\n");
        combined.extend_from_slice(&overlay);

        doc.change_page_content(page_id, combined)
            .map_err(|err| FinalizeError::Embed(err.to_string()))?;
    }

    let mut output = Vec::new();
    doc.save_to(&mut output).map_err(|err| FinalizeError::Save(err.to_string()))?;
    Ok(output)
}

/// Finalize a program record against the blob store
///
/// One-shot: the first success flips the record to `Finalized`; later
/// calls are rejected. On any error the record stays `Active` and the
/// store is untouched, so the original stays retrievable.
pub fn finalize_program(
    record: &mut ProgramRecord,
    store: &mut dyn BlobStore,
    ctx: &FinalizeContext,
) -> Result<DocumentRef, FinalizeError> {
    if !record.is_active() {
        return Err(FinalizeError::AlreadyFinalized);
    }
    let document = record.document.clone().ok_or(FinalizeError::MissingDocument)?;

    let original = store
        .get(&document.blob)
        .map_err(|err| FinalizeError::Load(err.to_string()))?;
    let flattened = flatten_document(&original, &record.annotations, ctx)?;

    let blob = store
        .put(BlobId::fresh(), flattened)
        .map_err(|err| FinalizeError::Save(err.to_string()))?;

    let stem = document.name.strip_suffix(".pdf").unwrap_or(&document.name);
    let finalized = DocumentRef { blob, name: format!("{stem}-final.pdf") };

    record
        .mark_finalized(finalized.clone())
        .map_err(|_| FinalizeError::AlreadyFinalized)?;
    Ok(finalized)
}

/// Read a page's dimensions, following the Parent chain for inherited
/// MediaBox entries; pages within one document may differ in size
fn page_frame(doc: &Document, page_id: ObjectId) -> PageFrame {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(id) = current {
        if depth > 32 {
            break;
        }
        let Ok(dict) = doc.get_dictionary(id) else { break };

        if let Ok(entry) = dict.get(b"MediaBox") {
            let resolved = match entry {
                Object::Reference(rid) => doc.get_object(*rid).ok(),
                other => Some(other),
            };
            if let Some(frame) = resolved
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageFrame { width: (x1 - x0).abs(), height: (y1 - y0).abs() })
                })
            {
                return frame;
            }
        }

        current = dict.get(b"Parent").ok().and_then(|obj| obj.as_reference().ok());
        depth += 1;
    }

    // US Letter default, as the format specifies for a missing MediaBox
    PageFrame { width: 612.0, height: 792.0 }
}

fn add_font_to_page(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
) -> Result<(), lopdf::Error> {
    enum Slot {
        Inline(Dictionary),
        Indirect(ObjectId),
        Missing,
    }

    let slot = {
        let resources = doc.get_or_create_resources(page_id)?.as_dict_mut()?;
        match resources.get(b"Font") {
            Ok(Object::Dictionary(existing)) => Slot::Inline(existing.clone()),
            Ok(Object::Reference(rid)) => Slot::Indirect(*rid),
            _ => Slot::Missing,
        }
    };

    let mut fonts = match slot {
        Slot::Inline(existing) => existing,
        Slot::Indirect(rid) => doc.get_dictionary(rid)?.clone(),
        Slot::Missing => Dictionary::new(),
    };
    fonts.set(FONT_NAME, Object::Reference(font_id));

    let resources = doc.get_or_create_resources(page_id)?.as_dict_mut()?;
    resources.set("Font", fonts);
    Ok(())
}

/// Build a small valid PDF for tests
#[cfg(test)]
pub(crate) fn fixture_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..page_count {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture should serialize");
    bytes
}
