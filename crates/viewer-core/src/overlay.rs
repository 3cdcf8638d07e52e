//! Overlay interaction state machine
//!
//! Tools are mutually exclusive. The gesture field holds at most one
//! in-flight interaction; starting a new one resolves the prior gesture
//! first. Events come in, commands go out; the overlay never touches the
//! annotation list itself.

use doc_model::{AnnotationId, Color, PercentPoint, MAX_SCALE, MIN_SCALE};

/// Anchor-to-pointer distance (in percent units) that maps to scale 1.0
pub const RESIZE_DISTANCE_NORM: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    View,
    Draw,
    PlaceSignature,
    PlaceNote,
    PlaceEvidenceLink,
}

/// What the pointer landed on, resolved by the host via hit testing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTarget {
    pub id: AnnotationId,
    /// The annotation's stored position, used as the resize anchor
    pub anchor: PercentPoint,
    pub on_resize_handle: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Dragging {
        id: AnnotationId,
    },
    Resizing {
        id: AnnotationId,
        anchor: PercentPoint,
    },
    Drawing {
        points: Vec<PercentPoint>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    SetTool(Tool),
    PointerDown { at: PercentPoint, hit: Option<HitTarget> },
    PointerMove { at: PercentPoint },
    PointerUp { at: PercentPoint },
    Escape,
    DeleteSelected,
}

/// Commands for the session layer to apply
///
/// `commit: false` updates are high-frequency previews that should only
/// touch in-memory state; `commit: true` arrives on pointer-up and is the
/// point to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    PlaceSignature { at: PercentPoint },
    PlaceNote { at: PercentPoint },
    /// Evidence links need a subject-selection step before anything is
    /// created, so placement only opens the dialog.
    BeginEvidenceSelection { at: PercentPoint },
    CommitStroke { path: Vec<PercentPoint>, color: Color, stroke_width: f32 },
    UpdatePosition { id: AnnotationId, to: PercentPoint, commit: bool },
    UpdateScale { id: AnnotationId, scale: f32, commit: bool },
    DeleteAnnotation { id: AnnotationId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    pub tool: Tool,
    pub gesture: Gesture,
    pub selected: Option<AnnotationId>,
    pub stroke_color: Color,
    pub stroke_width: f32,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            tool: Tool::View,
            gesture: Gesture::Idle,
            selected: None,
            stroke_color: Color::RED,
            stroke_width: 2.0,
        }
    }
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event through the machine, returning commands to apply
    pub fn apply(&mut self, event: OverlayEvent) -> Vec<OverlayCommand> {
        match event {
            OverlayEvent::SetTool(tool) => {
                // Abandon any in-flight gesture without a trace
                self.gesture = Gesture::Idle;
                if tool == Tool::Draw {
                    self.selected = None;
                }
                self.tool = tool;
                Vec::new()
            }
            OverlayEvent::PointerDown { at, hit } => self.pointer_down(at, hit),
            OverlayEvent::PointerMove { at } => self.pointer_move(at),
            OverlayEvent::PointerUp { at } => self.pointer_up(at),
            OverlayEvent::Escape => {
                if self.gesture != Gesture::Idle {
                    self.gesture = Gesture::Idle;
                } else {
                    self.selected = None;
                }
                Vec::new()
            }
            OverlayEvent::DeleteSelected => {
                if self.tool != Tool::View {
                    return Vec::new();
                }
                match self.selected.take() {
                    Some(id) => vec![OverlayCommand::DeleteAnnotation { id }],
                    None => Vec::new(),
                }
            }
        }
    }

    fn pointer_down(&mut self, at: PercentPoint, hit: Option<HitTarget>) -> Vec<OverlayCommand> {
        // Only one gesture may be active; a stray down event resolves the
        // previous one by dropping it.
        self.gesture = Gesture::Idle;

        match self.tool {
            Tool::Draw => {
                self.gesture = Gesture::Drawing { points: vec![at] };
                Vec::new()
            }
            Tool::PlaceSignature => {
                self.tool = Tool::View;
                vec![OverlayCommand::PlaceSignature { at }]
            }
            Tool::PlaceNote => {
                self.tool = Tool::View;
                vec![OverlayCommand::PlaceNote { at }]
            }
            Tool::PlaceEvidenceLink => {
                self.tool = Tool::View;
                vec![OverlayCommand::BeginEvidenceSelection { at }]
            }
            Tool::View => {
                match hit {
                    Some(target) => {
                        self.selected = Some(target.id);
                        self.gesture = if target.on_resize_handle {
                            Gesture::Resizing { id: target.id, anchor: target.anchor }
                        } else {
                            Gesture::Dragging { id: target.id }
                        };
                    }
                    None => self.selected = None,
                }
                Vec::new()
            }
        }
    }

    fn pointer_move(&mut self, at: PercentPoint) -> Vec<OverlayCommand> {
        match &mut self.gesture {
            Gesture::Drawing { points } => {
                if points.last() != Some(&at) {
                    points.push(at);
                }
                Vec::new()
            }
            Gesture::Dragging { id } => {
                vec![OverlayCommand::UpdatePosition { id: *id, to: at, commit: false }]
            }
            Gesture::Resizing { id, anchor } => {
                let scale = scale_from_distance(*anchor, at);
                vec![OverlayCommand::UpdateScale { id: *id, scale, commit: false }]
            }
            Gesture::Idle => Vec::new(),
        }
    }

    fn pointer_up(&mut self, at: PercentPoint) -> Vec<OverlayCommand> {
        match std::mem::take(&mut self.gesture) {
            Gesture::Drawing { points } => {
                // A single-point gesture is not a stroke; discard it.
                if points.len() < 2 {
                    return Vec::new();
                }
                vec![OverlayCommand::CommitStroke {
                    path: points,
                    color: self.stroke_color,
                    stroke_width: self.stroke_width,
                }]
            }
            Gesture::Dragging { id } => {
                vec![OverlayCommand::UpdatePosition { id, to: at, commit: true }]
            }
            Gesture::Resizing { id, anchor } => {
                let scale = scale_from_distance(anchor, at);
                vec![OverlayCommand::UpdateScale { id, scale, commit: true }]
            }
            Gesture::Idle => Vec::new(),
        }
    }
}

/// Scale from the distance between the annotation anchor and the pointer
fn scale_from_distance(anchor: PercentPoint, pointer: PercentPoint) -> f32 {
    let dx = pointer.x - anchor.x;
    let dy = pointer.y - anchor.y;
    let distance = (dx * dx + dy * dy).sqrt();
    (distance / RESIZE_DISTANCE_NORM).clamp(MIN_SCALE, MAX_SCALE)
}
