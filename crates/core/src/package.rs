//! Report packaging: merge attachments and name the deliverable
//!
//! The happy path is a single merged PDF. Attachments that cannot be
//! parsed are carried alongside the merged document in a zip bundle
//! instead of being dropped or failing the whole export.

use log::warn;
use lopdf::{Document, Object, ObjectId};
use std::io::Write;
use zip::write::{ExtendedFileOptions, FileOptions};
use zip::{CompressionMethod, ZipWriter};

/// A document plus the file name it should carry in the deliverable
#[derive(Debug, Clone, PartialEq)]
pub struct NamedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Final export artifact
#[derive(Debug, Clone, PartialEq)]
pub enum Deliverable {
    /// Everything merged into one PDF
    Pdf(NamedDocument),
    /// Merged PDF plus unmergeable attachments, zipped together
    Bundle(NamedDocument),
}

impl Deliverable {
    pub fn name(&self) -> &str {
        match self {
            Deliverable::Pdf(doc) | Deliverable::Bundle(doc) => &doc.name,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Deliverable::Pdf(doc) | Deliverable::Bundle(doc) => &doc.bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("primary document unreadable: {0}")]
    Primary(String),
    #[error("merged document could not be saved: {0}")]
    Save(String),
    #[error("archive failed: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append every parseable attachment to the primary document
///
/// Returns the merged bytes and the attachments that failed to parse, in
/// their original order. The primary failing to parse is fatal; a bad
/// attachment is not.
pub fn merge_attachments(
    primary: &[u8],
    attachments: Vec<NamedDocument>,
) -> Result<(Vec<u8>, Vec<NamedDocument>), PackageError> {
    let mut merged =
        Document::load_mem(primary).map_err(|err| PackageError::Primary(err.to_string()))?;

    let mut unmerged = Vec::new();
    for attachment in attachments {
        let source = match Document::load_mem(&attachment.bytes) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("attachment {:?} unparsable ({err}); carrying it separately", attachment.name);
                unmerged.push(attachment);
                continue;
            }
        };
        if let Err(err) = append_document(&mut merged, source) {
            warn!("attachment {:?} failed to merge ({err}); carrying it separately", attachment.name);
            unmerged.push(attachment);
        }
    }

    let mut bytes = Vec::new();
    merged.save_to(&mut bytes).map_err(|err| PackageError::Save(err.to_string()))?;
    Ok((bytes, unmerged))
}

/// Produce the deliverable for a finalized report
///
/// A clean merge yields `{base_name}.pdf`. If any attachment could not
/// be merged, the result is `{base_name}.zip` containing the merged PDF
/// at the top level and the leftovers under `Attachments/`.
pub fn package_report(
    primary: NamedDocument,
    attachments: Vec<NamedDocument>,
    base_name: &str,
) -> Result<Deliverable, PackageError> {
    let (merged, unmerged) = merge_attachments(&primary.bytes, attachments)?;

    if unmerged.is_empty() {
        return Ok(Deliverable::Pdf(NamedDocument {
            name: format!("{base_name}.pdf"),
            bytes: merged,
        }));
    }

    let mut buffer = Vec::new();
    {
        let mut writer = ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options =
            FileOptions::<ExtendedFileOptions>::default().compression_method(CompressionMethod::Stored);

        writer.start_file(format!("{base_name}.pdf"), options.clone())?;
        writer.write_all(&merged)?;

        for attachment in &unmerged {
            writer.start_file(format!("Attachments/{}", attachment.name), options.clone())?;
            writer.write_all(&attachment.bytes)?;
        }
        writer.finish()?;
    }

    Ok(Deliverable::Bundle(NamedDocument { name: format!("{base_name}.zip"), bytes: buffer }))
}

/// File-system-safe deliverable base name from class and period qualifier
pub fn deliverable_name(class_name: &str, qualifier: &str) -> String {
    let raw = format!("{class_name}-{qualifier}");
    let mut name = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch);
            last_dash = false;
        } else if !last_dash {
            name.push('-');
            last_dash = true;
        }
    }
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Graft every page of `source` onto the end of `target`
fn append_document(target: &mut Document, mut source: Document) -> Result<(), lopdf::Error> {
    source.renumber_objects_with(target.max_id + 1);
    target.max_id = source.max_id;

    let target_pages_id = target.catalog()?.get(b"Pages")?.as_reference()?;
    let source_pages: Vec<ObjectId> = source.get_pages().into_values().collect();

    // Inherited page-tree attributes must be materialized onto each page
    // before it is grafted under a foreign parent.
    const INHERITED: [&[u8]; 4] = [b"MediaBox", b"Resources", b"Rotate", b"CropBox"];
    for &page_id in &source_pages {
        for key in INHERITED {
            let present = source.get_dictionary(page_id).map(|d| d.has(key)).unwrap_or(false);
            if present {
                continue;
            }
            if let Some(value) = inherited_attribute(&source, page_id, key) {
                source.get_object_mut(page_id)?.as_dict_mut()?.set(key, value);
            }
        }
        source
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Parent", Object::Reference(target_pages_id));
    }

    // The source catalog and page tree root would become unreferenced
    // garbage; drop them instead of carrying them over.
    if let Ok(root) = source.trailer.get(b"Root").and_then(Object::as_reference) {
        if let Ok(pages_root) = source
            .get_dictionary(root)
            .and_then(|catalog| catalog.get(b"Pages"))
            .and_then(Object::as_reference)
        {
            source.objects.remove(&pages_root);
        }
        source.objects.remove(&root);
    }

    let objects = std::mem::take(&mut source.objects);
    target.objects.extend(objects);

    let added = source_pages.len() as i64;
    let pages_dict = target.get_object_mut(target_pages_id)?.as_dict_mut()?;
    {
        let kids = pages_dict.get_mut(b"Kids")?.as_array_mut()?;
        for &page_id in &source_pages {
            kids.push(Object::Reference(page_id));
        }
    }
    let count = pages_dict.get(b"Count").and_then(Object::as_i64).unwrap_or(0) + added;
    pages_dict.set("Count", count);
    Ok(())
}

/// Walk the Parent chain for an inheritable page attribute
fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(id) = current {
        if depth > 32 {
            return None;
        }
        let dict = doc.get_dictionary(id).ok()?;
        if let Ok(value) = dict.get(key) {
            let resolved = match value {
                Object::Reference(rid) => doc.get_object(*rid).ok()?.clone(),
                other => other.clone(),
            };
            return Some(resolved);
        }
        current = dict.get(b"Parent").ok().and_then(|obj| obj.as_reference().ok());
        depth += 1;
    }
    None
}
