//! Annotation session, evidence linking, finalization, and packaging
//!
//! The interactive side (session + evidence) mutates a `ProgramRecord`
//! while it is active; `finalize` is the one-way transformation that
//! bakes the annotation list into a new immutable PDF; `package` turns
//! the finalized document plus attachments into a single deliverable.

pub mod content;
pub mod evidence;
pub mod finalize;
pub mod package;
pub mod session;

pub use evidence::{
    commit_evidence_link, EvidenceDraft, EvidenceError, EvidenceOutcome, RegistryError,
    SubjectRegistry,
};
pub use finalize::{finalize_program, flatten_document, FinalizeContext, FinalizeError, FinalizeGate};
pub use package::{deliverable_name, package_report, Deliverable, NamedDocument, PackageError};
pub use session::{
    AnnotationPatch, AnnotationSession, CommandOutcome, FlushConfig, Persistence,
    PersistenceError, SessionError,
};
