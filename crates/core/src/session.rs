//! Annotation session with batched persistence
//!
//! Owns the working copy of a program record and batches writes to avoid
//! I/O on every pointer move. In-memory state is authoritative: a failed
//! save is logged and retried on the next flush, never rolled back.

use crate::finalize::{finalize_program, FinalizeContext, FinalizeError};
use blob_store::BlobStore;
use doc_model::{
    Annotation, AnnotationBody, AnnotationId, DocumentRef, ModelError, PercentPoint,
    ProgramId, ProgramRecord, ProgramStatus, MAX_SCALE, MIN_SCALE,
};
use log::warn;
use std::time::{Duration, Instant};
use viewer_core::OverlayCommand;

/// Where annotation lists and status changes end up
pub trait Persistence {
    fn save_annotations(
        &mut self,
        program: ProgramId,
        annotations: &[Annotation],
    ) -> Result<(), PersistenceError>;

    fn set_status(
        &mut self,
        program: ProgramId,
        status: ProgramStatus,
    ) -> Result<(), PersistenceError>;
}

#[derive(Debug, thiserror::Error)]
#[error("persistence failed: {0}")]
pub struct PersistenceError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("program is finalized; annotations are read-only")]
    Finalized,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Debounce windows for batched saves
///
/// A save happens once input has been quiet for `debounce`, or
/// unconditionally once `max_debounce` has passed since the first unsaved
/// change, so a long drag still hits disk on the way.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    pub debounce: Duration,
    pub max_debounce: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            max_debounce: Duration::from_secs(2),
        }
    }
}

/// Dirty-state tracking for the debounced save
#[derive(Debug)]
struct PendingWrite {
    first_marked_at: Instant,
    last_marked_at: Instant,
    is_dirty: bool,
}

impl PendingWrite {
    fn new() -> Self {
        Self {
            first_marked_at: Instant::now(),
            last_marked_at: Instant::now(),
            is_dirty: false,
        }
    }

    fn mark_dirty(&mut self) {
        let now = Instant::now();
        if !self.is_dirty {
            self.first_marked_at = now;
        }
        self.last_marked_at = now;
        self.is_dirty = true;
    }

    fn clear(&mut self) {
        self.is_dirty = false;
    }

    fn should_flush(&self, config: &FlushConfig) -> bool {
        if !self.is_dirty {
            return false;
        }
        self.last_marked_at.elapsed() >= config.debounce
            || self.first_marked_at.elapsed() >= config.max_debounce
    }
}

/// Partial update to one annotation; absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationPatch {
    pub position: Option<PercentPoint>,
    pub scale: Option<f32>,
    pub note_text: Option<String>,
}

/// What applying an overlay command produced
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    None,
    Created(AnnotationId),
    /// The host must run subject selection and then commit the evidence
    /// link separately; nothing has been created yet.
    EvidenceSelectionRequested { at: PercentPoint },
}

pub struct AnnotationSession<P: Persistence> {
    record: ProgramRecord,
    persistence: P,
    pending: PendingWrite,
    config: FlushConfig,
}

impl<P: Persistence> AnnotationSession<P> {
    pub fn new(record: ProgramRecord, persistence: P) -> Self {
        Self::with_config(record, persistence, FlushConfig::default())
    }

    pub fn with_config(record: ProgramRecord, persistence: P, config: FlushConfig) -> Self {
        Self { record, persistence, pending: PendingWrite::new(), config }
    }

    pub fn record(&self) -> &ProgramRecord {
        &self.record
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn annotations_for_page(&self, page: u32) -> impl Iterator<Item = &Annotation> {
        self.record.annotations_for_page(page)
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_dirty
    }

    /// Add an annotation and persist immediately
    ///
    /// Structural changes are saved eagerly; only high-frequency
    /// position/scale previews go through the debounce.
    pub fn create(&mut self, annotation: Annotation) -> Result<AnnotationId, SessionError> {
        self.ensure_active()?;
        let id = annotation.id;
        self.record.annotations.push(annotation);
        self.pending.mark_dirty();
        self.flush_now();
        Ok(id)
    }

    /// Apply a partial update; returns false when the id is unknown
    ///
    /// An update racing a deletion resolves to a no-op rather than an
    /// error, so a late pointer-up after delete is harmless.
    pub fn update(
        &mut self,
        id: AnnotationId,
        patch: AnnotationPatch,
        commit: bool,
    ) -> Result<bool, SessionError> {
        self.ensure_active()?;
        let Some(annotation) = self.record.annotations.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };

        if let Some(to) = patch.position {
            // Drawings move as a unit; the whole path shifts with the anchor
            if let AnnotationBody::Drawing { path, .. } = &mut annotation.body {
                let dx = to.x - annotation.position.x;
                let dy = to.y - annotation.position.y;
                for point in path.iter_mut() {
                    *point = PercentPoint::new(point.x + dx, point.y + dy);
                }
            }
            annotation.position = to;
        }
        if let Some(scale) = patch.scale {
            annotation.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        }
        if let Some(text) = patch.note_text {
            if let AnnotationBody::Note { text: existing } = &mut annotation.body {
                *existing = text;
            }
        }

        self.pending.mark_dirty();
        if commit {
            self.flush_now();
        }
        Ok(true)
    }

    /// Remove an annotation and persist immediately; unknown ids are a no-op
    pub fn delete(&mut self, id: AnnotationId) -> Result<bool, SessionError> {
        self.ensure_active()?;
        let before = self.record.annotations.len();
        self.record.annotations.retain(|a| a.id != id);
        if self.record.annotations.len() == before {
            return Ok(false);
        }
        self.pending.mark_dirty();
        self.flush_now();
        Ok(true)
    }

    /// Apply one overlay command against the given page
    pub fn apply_command(
        &mut self,
        page: u32,
        command: OverlayCommand,
    ) -> Result<CommandOutcome, SessionError> {
        match command {
            OverlayCommand::PlaceSignature { at } => {
                let id = self.create(Annotation::signature(page, at))?;
                Ok(CommandOutcome::Created(id))
            }
            OverlayCommand::PlaceNote { at } => {
                let id = self.create(Annotation::note(page, at, String::new()))?;
                Ok(CommandOutcome::Created(id))
            }
            OverlayCommand::BeginEvidenceSelection { at } => {
                Ok(CommandOutcome::EvidenceSelectionRequested { at })
            }
            OverlayCommand::CommitStroke { path, color, stroke_width } => {
                let drawing = Annotation::drawing(page, path, color, stroke_width)
                    .map_err(SessionError::Model)?;
                let id = self.create(drawing)?;
                Ok(CommandOutcome::Created(id))
            }
            OverlayCommand::UpdatePosition { id, to, commit } => {
                let patch = AnnotationPatch { position: Some(to), ..Default::default() };
                self.update(id, patch, commit)?;
                Ok(CommandOutcome::None)
            }
            OverlayCommand::UpdateScale { id, scale, commit } => {
                let patch = AnnotationPatch { scale: Some(scale), ..Default::default() };
                self.update(id, patch, commit)?;
                Ok(CommandOutcome::None)
            }
            OverlayCommand::DeleteAnnotation { id } => {
                self.delete(id)?;
                Ok(CommandOutcome::None)
            }
        }
    }

    /// Save now if dirty; a failed save keeps the dirty flag for retry
    pub fn flush_now(&mut self) {
        if !self.pending.is_dirty {
            return;
        }
        match self.persistence.save_annotations(self.record.id, &self.record.annotations) {
            Ok(()) => self.pending.clear(),
            Err(err) => {
                warn!("annotation save failed for program {}: {err}", self.record.id.0);
            }
        }
    }

    /// Save if the debounce window has elapsed; call from a timer tick
    pub fn flush_if_due(&mut self) {
        if self.pending.should_flush(&self.config) {
            self.flush_now();
        }
    }

    /// Finalize this session's record
    ///
    /// Unsaved annotations are flushed first so the flattened output
    /// matches what the user sees. The status write is best-effort; the
    /// record transition already happened and wins on conflict.
    pub fn finalize(
        &mut self,
        store: &mut dyn BlobStore,
        ctx: &FinalizeContext,
    ) -> Result<DocumentRef, FinalizeError> {
        self.flush_now();
        let finalized = finalize_program(&mut self.record, store, ctx)?;

        if let Err(err) = self.persistence.set_status(self.record.id, ProgramStatus::Finalized) {
            warn!("status save failed for program {}: {err}", self.record.id.0);
        }
        Ok(finalized)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.record.is_active() {
            Ok(())
        } else {
            Err(SessionError::Finalized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::Color;

    #[derive(Debug, Default)]
    struct RecordingPersistence {
        saved_counts: Vec<usize>,
        statuses: Vec<ProgramStatus>,
        fail_saves: bool,
    }

    impl Persistence for RecordingPersistence {
        fn save_annotations(
            &mut self,
            _program: ProgramId,
            annotations: &[Annotation],
        ) -> Result<(), PersistenceError> {
            if self.fail_saves {
                return Err(PersistenceError("disk full".to_owned()));
            }
            self.saved_counts.push(annotations.len());
            Ok(())
        }

        fn set_status(
            &mut self,
            _program: ProgramId,
            status: ProgramStatus,
        ) -> Result<(), PersistenceError> {
            self.statuses.push(status);
            Ok(())
        }
    }

    fn session() -> AnnotationSession<RecordingPersistence> {
        let record = ProgramRecord::new(ProgramId(1), "Report", "7A", None);
        AnnotationSession::new(record, RecordingPersistence::default())
    }

    #[test]
    fn create_persists_immediately() {
        let mut session = session();
        let id = session
            .create(Annotation::note(1, PercentPoint::new(10.0, 10.0), "hi"))
            .expect("create succeeds");

        assert!(!session.is_dirty());
        assert_eq!(session.persistence().saved_counts, vec![1]);
        assert!(session.record().annotation(id).is_some());
    }

    #[test]
    fn preview_updates_do_not_hit_persistence() {
        let mut session = session();
        let id = session
            .create(Annotation::note(1, PercentPoint::new(10.0, 10.0), "hi"))
            .expect("create succeeds");

        for step in 1..=20 {
            let patch = AnnotationPatch {
                position: Some(PercentPoint::new(10.0 + step as f32, 10.0)),
                ..Default::default()
            };
            session.update(id, patch, false).expect("preview update succeeds");
        }

        assert!(session.is_dirty());
        assert_eq!(session.persistence().saved_counts.len(), 1, "only the create was saved");

        let patch = AnnotationPatch {
            position: Some(PercentPoint::new(42.0, 10.0)),
            ..Default::default()
        };
        session.update(id, patch, true).expect("commit update succeeds");
        assert!(!session.is_dirty());
        assert_eq!(session.persistence().saved_counts.len(), 2);
        assert_eq!(
            session.record().annotation(id).expect("annotation exists").position,
            PercentPoint::new(42.0, 10.0)
        );
    }

    #[test]
    fn update_after_delete_is_a_silent_no_op() {
        let mut session = session();
        let id = session
            .create(Annotation::note(1, PercentPoint::new(10.0, 10.0), "hi"))
            .expect("create succeeds");

        assert!(session.delete(id).expect("delete succeeds"));

        let patch = AnnotationPatch {
            position: Some(PercentPoint::new(50.0, 50.0)),
            ..Default::default()
        };
        let applied = session.update(id, patch, true).expect("update must not error");
        assert!(!applied);
        assert!(session.record().annotations.is_empty());
    }

    #[test]
    fn moving_a_drawing_shifts_its_whole_path() {
        let mut session = session();
        let drawing = Annotation::drawing(
            1,
            vec![PercentPoint::new(10.0, 10.0), PercentPoint::new(20.0, 20.0)],
            Color::RED,
            2.0,
        )
        .expect("valid drawing");
        let id = session.create(drawing).expect("create succeeds");

        let patch = AnnotationPatch {
            position: Some(PercentPoint::new(15.0, 10.0)),
            ..Default::default()
        };
        session.update(id, patch, true).expect("update succeeds");

        let moved = session.record().annotation(id).expect("annotation exists");
        match &moved.body {
            AnnotationBody::Drawing { path, .. } => {
                assert_eq!(path[0], PercentPoint::new(15.0, 10.0));
                assert_eq!(path[1], PercentPoint::new(25.0, 20.0));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn failed_save_keeps_memory_state_and_dirty_flag() {
        let mut session = session();
        session.persistence.fail_saves = true;

        let id = session
            .create(Annotation::note(1, PercentPoint::new(10.0, 10.0), "survives"))
            .expect("create succeeds despite save failure");

        assert!(session.is_dirty(), "dirty flag stays set for retry");
        assert!(session.record().annotation(id).is_some(), "memory is authoritative");

        session.persistence.fail_saves = false;
        session.flush_now();
        assert!(!session.is_dirty());
        assert_eq!(session.persistence().saved_counts, vec![1]);
    }

    #[test]
    fn flush_if_due_respects_debounce_window() {
        let record = ProgramRecord::new(ProgramId(1), "Report", "7A", None);
        let config = FlushConfig {
            debounce: Duration::from_secs(60),
            max_debounce: Duration::from_secs(120),
        };
        let mut session =
            AnnotationSession::with_config(record, RecordingPersistence::default(), config);

        session.record.annotations.push(Annotation::note(
            1,
            PercentPoint::new(1.0, 1.0),
            "quiet",
        ));
        session.pending.mark_dirty();

        session.flush_if_due();
        assert!(session.is_dirty(), "window not elapsed, no save yet");

        session.config.debounce = Duration::ZERO;
        session.flush_if_due();
        assert!(!session.is_dirty());
        assert_eq!(session.persistence().saved_counts, vec![1]);
    }

    #[test]
    fn overlay_commands_drive_the_session() {
        let mut session = session();

        let outcome = session
            .apply_command(1, OverlayCommand::PlaceNote { at: PercentPoint::new(25.0, 75.0) })
            .expect("place note succeeds");
        let CommandOutcome::Created(note_id) = outcome else {
            panic!("expected creation, got {outcome:?}");
        };

        let outcome = session
            .apply_command(
                1,
                OverlayCommand::BeginEvidenceSelection { at: PercentPoint::new(80.0, 90.0) },
            )
            .expect("selection request succeeds");
        assert_eq!(
            outcome,
            CommandOutcome::EvidenceSelectionRequested { at: PercentPoint::new(80.0, 90.0) }
        );
        assert_eq!(session.record().annotations.len(), 1, "selection creates nothing");

        session
            .apply_command(1, OverlayCommand::DeleteAnnotation { id: note_id })
            .expect("delete succeeds");
        assert!(session.record().annotations.is_empty());
    }

    #[test]
    fn finalized_record_rejects_mutation() {
        let mut session = session();
        session
            .record
            .mark_finalized(DocumentRef {
                blob: doc_model::BlobId::fresh(),
                name: "final.pdf".to_owned(),
            })
            .expect("transition succeeds");

        let err = session
            .create(Annotation::note(1, PercentPoint::new(10.0, 10.0), "late"))
            .expect_err("finalized record is read-only");
        assert!(matches!(err, SessionError::Finalized));
    }
}
