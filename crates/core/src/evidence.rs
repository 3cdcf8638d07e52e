//! Evidence linking across the annotation and subject-registry boundary
//!
//! One commit creates a badge annotation on the document and one log
//! entry per selected subject. The two sides have no shared transaction,
//! so the commit is ordered to fail early (validation first, annotation
//! second) and to degrade per-subject afterwards.

use crate::session::{AnnotationSession, Persistence, SessionError};
use doc_model::{
    Annotation, AnnotationId, EvidenceLogEntry, PercentPoint, Subject, SubjectId,
};
use log::warn;

#[derive(Debug, thiserror::Error)]
#[error("subject registry failed: {0}")]
pub struct RegistryError(pub String);

/// External store of subjects and their per-subject evidence logs
pub trait SubjectRegistry {
    /// Subjects enrolled in the named class
    fn list(&self, class_name: &str) -> Vec<Subject>;

    fn append_log(
        &mut self,
        subject: SubjectId,
        entry: EvidenceLogEntry,
    ) -> Result<(), RegistryError>;
}

/// A filled-in evidence dialog, ready to commit
///
/// Dropping the draft without committing leaves no trace anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceDraft {
    pub page: u32,
    pub position: PercentPoint,
    pub category: String,
    pub note: String,
    pub subjects: Vec<SubjectId>,
}

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("an evidence link needs at least one subject")]
    NoSubjects,
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceOutcome {
    pub annotation: AnnotationId,
    pub entries_written: usize,
    /// Subjects whose log append failed; the annotation still exists
    pub failed_subjects: Vec<SubjectId>,
}

/// Commit a draft: badge annotation first, then one log entry per subject
///
/// Validation happens before any side effect, so an empty subject list
/// leaves both stores untouched. After the annotation exists, individual
/// log failures are reported in the outcome rather than unwinding the
/// commit; callers surface `failed_subjects` to the user.
pub fn commit_evidence_link<P: Persistence>(
    session: &mut AnnotationSession<P>,
    registry: &mut dyn SubjectRegistry,
    draft: EvidenceDraft,
) -> Result<EvidenceOutcome, EvidenceError> {
    if draft.subjects.is_empty() {
        return Err(EvidenceError::NoSubjects);
    }

    let annotation = Annotation::evidence_link(
        draft.page,
        draft.position,
        draft.category.clone(),
        draft.subjects.len(),
    );
    let annotation_id = session.create(annotation)?;

    let document = session.record().document.as_ref().map(|d| d.blob.clone());
    let created_at = doc_model::unix_now();

    let mut entries_written = 0;
    let mut failed_subjects = Vec::new();
    for subject in &draft.subjects {
        let entry = EvidenceLogEntry {
            subject: *subject,
            category: draft.category.clone(),
            note: draft.note.clone(),
            document: document.clone(),
            page: draft.page,
            created_at,
        };
        match registry.append_log(*subject, entry) {
            Ok(()) => entries_written += 1,
            Err(err) => {
                warn!("evidence log append failed for subject {}: {err}", subject.0);
                failed_subjects.push(*subject);
            }
        }
    }

    Ok(EvidenceOutcome { annotation: annotation_id, entries_written, failed_subjects })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PersistenceError, Persistence};
    use doc_model::{AnnotationBody, ProgramId, ProgramRecord, ProgramStatus};
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct NullPersistence;

    impl Persistence for NullPersistence {
        fn save_annotations(
            &mut self,
            _program: ProgramId,
            _annotations: &[Annotation],
        ) -> Result<(), PersistenceError> {
            Ok(())
        }

        fn set_status(
            &mut self,
            _program: ProgramId,
            _status: ProgramStatus,
        ) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeRegistry {
        logs: HashMap<SubjectId, Vec<EvidenceLogEntry>>,
        failing: Vec<SubjectId>,
    }

    impl SubjectRegistry for FakeRegistry {
        fn list(&self, _class_name: &str) -> Vec<Subject> {
            vec![
                Subject { id: SubjectId(1), name: "Avery".to_owned() },
                Subject { id: SubjectId(2), name: "Blake".to_owned() },
                Subject { id: SubjectId(3), name: "Casey".to_owned() },
            ]
        }

        fn append_log(
            &mut self,
            subject: SubjectId,
            entry: EvidenceLogEntry,
        ) -> Result<(), RegistryError> {
            if self.failing.contains(&subject) {
                return Err(RegistryError("registry offline".to_owned()));
            }
            self.logs.entry(subject).or_default().push(entry);
            Ok(())
        }
    }

    fn session() -> AnnotationSession<NullPersistence> {
        let record = ProgramRecord::new(ProgramId(1), "Term report", "7A", None);
        AnnotationSession::new(record, NullPersistence)
    }

    fn draft(subjects: Vec<SubjectId>) -> EvidenceDraft {
        EvidenceDraft {
            page: 2,
            position: PercentPoint::new(80.0, 90.0),
            category: "Differentiation".to_owned(),
            note: "Adjusted reading groups".to_owned(),
            subjects,
        }
    }

    #[test]
    fn commit_creates_annotation_and_one_entry_per_subject() {
        let mut session = session();
        let mut registry = FakeRegistry::default();
        let subjects = vec![SubjectId(1), SubjectId(2), SubjectId(3)];

        let outcome = commit_evidence_link(&mut session, &mut registry, draft(subjects.clone()))
            .expect("commit succeeds");

        assert_eq!(outcome.entries_written, 3);
        assert!(outcome.failed_subjects.is_empty());

        let annotation = session
            .record()
            .annotation(outcome.annotation)
            .expect("badge annotation exists");
        match &annotation.body {
            AnnotationBody::EvidenceLink { category, subject_count, summary } => {
                assert_eq!(category, "Differentiation");
                assert_eq!(*subject_count, 3);
                assert_eq!(summary, "Differentiation (3 students)");
            }
            other => panic!("unexpected body {other:?}"),
        }

        for subject in subjects {
            let entries = &registry.logs[&subject];
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].page, 2);
            assert_eq!(entries[0].note, "Adjusted reading groups");
        }
    }

    #[test]
    fn empty_subject_list_has_no_side_effects() {
        let mut session = session();
        let mut registry = FakeRegistry::default();

        let err = commit_evidence_link(&mut session, &mut registry, draft(Vec::new()))
            .expect_err("empty selection must be rejected");
        assert!(matches!(err, EvidenceError::NoSubjects));

        assert!(session.record().annotations.is_empty());
        assert!(registry.logs.is_empty());
    }

    #[test]
    fn partial_registry_failure_keeps_annotation_and_reports_subjects() {
        let mut session = session();
        let mut registry = FakeRegistry { failing: vec![SubjectId(2)], ..Default::default() };

        let outcome = commit_evidence_link(
            &mut session,
            &mut registry,
            draft(vec![SubjectId(1), SubjectId(2), SubjectId(3)]),
        )
        .expect("commit proceeds past individual failures");

        assert_eq!(outcome.entries_written, 2);
        assert_eq!(outcome.failed_subjects, vec![SubjectId(2)]);
        assert!(session.record().annotation(outcome.annotation).is_some());
        assert!(registry.logs.contains_key(&SubjectId(1)));
        assert!(!registry.logs.contains_key(&SubjectId(2)));
    }

    #[test]
    fn abandoned_draft_writes_nothing() {
        let session = session();
        let registry = FakeRegistry::default();

        // The dialog was opened and filled in, then cancelled
        let _draft = draft(vec![SubjectId(1)]);

        assert!(session.record().annotations.is_empty());
        assert!(registry.logs.is_empty());
    }
}
