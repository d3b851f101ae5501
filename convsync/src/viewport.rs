//! Scroll geometry and anchor preservation.
//!
//! When older messages are prepended, everything below them moves down by
//! the height they add. [`ScrollAnchor`] captures the geometry before the
//! prepend and shifts the scroll offset afterwards so the element that was
//! topmost stays topmost.
//!
//! Offsets follow the DOM convention: `scroll_top` is the distance from the
//! top of the content to the top of the visible area, `0.0` at the oldest
//! message.

use convsync_proto::message::{Message, MessageKey};

/// Distance from the top under which the viewport counts as "at the oldest
/// visible item".
pub const DEFAULT_TOP_THRESHOLD_PX: f32 = 8.0;

/// A scrollable view over the merged message list.
pub trait Viewport: Send {
    /// Current scroll offset from the top of the content.
    fn scroll_top(&self) -> f32;

    /// Move the scroll offset.
    fn set_scroll_top(&mut self, top: f32);

    /// Total content height.
    fn scroll_height(&self) -> f32;

    /// Re-measure after the list changed.
    fn relayout(&mut self, messages: &[Message]);

    /// Whether the oldest loaded message is in view.
    fn is_at_oldest_visible(&self, threshold: f32) -> bool {
        self.scroll_top() <= threshold
    }
}

/// Scroll geometry captured before a prepend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    scroll_top: f32,
    scroll_height: f32,
}

impl ScrollAnchor {
    /// Capture the current geometry.
    pub fn capture(viewport: &dyn Viewport) -> Self {
        Self {
            scroll_top: viewport.scroll_top(),
            scroll_height: viewport.scroll_height(),
        }
    }

    /// Shift the offset by the height added since capture.
    ///
    /// Call after [`Viewport::relayout`]. Returns the applied delta.
    pub fn restore(self, viewport: &mut dyn Viewport) -> f32 {
        let delta = viewport.scroll_height() - self.scroll_height;
        viewport.set_scroll_top((self.scroll_top + delta).max(0.0));
        delta
    }
}

/// Viewport that lays messages out as stacked rows of measured height.
///
/// The height of each row comes from a caller-supplied function, which lets
/// tests model multi-line messages and media without a renderer.
pub struct RowViewport {
    height_of: Box<dyn Fn(&Message) -> f32 + Send>,
    client_height: f32,
    scroll_top: f32,
    rows: Vec<(MessageKey, f32)>,
}

impl RowViewport {
    /// A viewport of `client_height` pixels whose rows are all `row_height`.
    #[must_use]
    pub fn uniform(client_height: f32, row_height: f32) -> Self {
        Self::with_heights(client_height, move |_| row_height)
    }

    /// A viewport whose row heights come from `height_of`.
    pub fn with_heights(
        client_height: f32,
        height_of: impl Fn(&Message) -> f32 + Send + 'static,
    ) -> Self {
        Self {
            height_of: Box::new(height_of),
            client_height,
            scroll_top: 0.0,
            rows: Vec::new(),
        }
    }

    /// Largest valid scroll offset.
    #[must_use]
    pub fn max_scroll_top(&self) -> f32 {
        (self.scroll_height() - self.client_height).max(0.0)
    }

    /// Scroll to the newest message.
    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.max_scroll_top();
    }

    /// Key of the row at the top edge of the visible area.
    #[must_use]
    pub fn topmost_visible(&self) -> Option<&MessageKey> {
        let mut offset = 0.0;
        for (key, height) in &self.rows {
            if offset + height > self.scroll_top {
                return Some(key);
            }
            offset += height;
        }
        self.rows.last().map(|(key, _)| key)
    }
}

impl Viewport for RowViewport {
    fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    fn set_scroll_top(&mut self, top: f32) {
        self.scroll_top = top.clamp(0.0, self.max_scroll_top());
    }

    fn scroll_height(&self) -> f32 {
        self.rows.iter().map(|(_, h)| h).sum()
    }

    fn relayout(&mut self, messages: &[Message]) {
        self.rows = messages
            .iter()
            .map(|m| (m.key(), (self.height_of)(m)))
            .collect();
        self.scroll_top = self.scroll_top.clamp(0.0, self.max_scroll_top());
    }
}

impl std::fmt::Debug for RowViewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowViewport")
            .field("client_height", &self.client_height)
            .field("scroll_top", &self.scroll_top)
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}
