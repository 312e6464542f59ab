//! Keeps the list viewport where the user left it across list replacements.

/// Handle to the scrollable element that shows the zone list.
pub trait ScrollContainer {
    fn scroll_offset(&self) -> f64;
    fn set_scroll_offset(&mut self, offset: f64);
}

/// Captures the offset before a commit and puts it back once the next frame is drawn.
#[derive(Debug, Default)]
pub struct ScrollPreserver {
    pending: Option<f64>,
}

impl ScrollPreserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `commit` with the container's current offset captured for restoration.
    /// When several commits land before one frame, the earliest offset is kept.
    pub fn preserve<C, R>(&mut self, container: &C, commit: impl FnOnce() -> R) -> R
    where
        C: ScrollContainer + ?Sized,
    {
        let offset = container.scroll_offset();
        let result = commit();
        self.pending.get_or_insert(offset);
        result
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Call after the frame reflecting the commit has been rendered.
    pub fn restore<C>(&mut self, container: &mut C)
    where
        C: ScrollContainer + ?Sized,
    {
        if let Some(offset) = self.pending.take() {
            container.set_scroll_offset(offset);
        }
    }
}
