//! Stale-render rejection
//!
//! Page rendering is asynchronous; navigating or zooming while a render
//! is in flight must not let the slow result overwrite the newer view.
//! Each request gets a monotonically increasing generation and only the
//! latest generation's completion is accepted.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderRequestKey {
    pub page: u32,
    pub zoom_percent: u16,
}

#[derive(Debug, Default)]
pub struct RenderTracker {
    generation: u64,
    current: Option<RenderRequestKey>,
}

impl RenderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new render request, invalidating all prior ones
    pub fn begin(&mut self, key: RenderRequestKey) -> u64 {
        self.generation += 1;
        self.current = Some(key);
        self.generation
    }

    /// Whether a completion carrying this generation may be applied
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_request(&self) -> Option<RenderRequestKey> {
        self.current
    }
}
