//! Queue entries for synthesized audio segments.

use bytes::Bytes;

/// Cleanup hook run exactly once when an item is destroyed, whatever the
/// reason (played, errored, or interrupted). Used to release file-backed
/// payloads and other temp resources.
pub type DisposeFn = Box<dyn FnOnce() + Send>;

/// One synthesized-audio segment awaiting playback.
///
/// Default priority is 0 for all segments, which makes normal operation
/// strict FIFO; higher priorities jump the queue.
pub struct PlaylistItem {
    /// Encoded or raw audio payload.
    pub audio: Bytes,
    /// Payload mime type (e.g. `audio/pcm`, `audio/mpeg`).
    pub mime: String,
    /// Text this segment was synthesized from, for logs and UI.
    pub text: Option<String>,
    /// Queue priority; higher plays first. Ties resolve by insertion order.
    pub priority: i32,
    disposer: Option<DisposeFn>,
}

impl PlaylistItem {
    pub fn new(audio: Bytes, mime: impl Into<String>) -> Self {
        Self {
            audio,
            mime: mime.into(),
            text: None,
            priority: 0,
            disposer: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a cleanup hook for backing resources.
    pub fn on_dispose(mut self, hook: DisposeFn) -> Self {
        self.disposer = Some(hook);
        self
    }

    /// Short description for logging.
    pub fn label(&self) -> String {
        match &self.text {
            Some(text) if text.chars().count() > 32 => {
                let head: String = text.chars().take(32).collect();
                format!("\"{head}…\"")
            }
            Some(text) => format!("\"{text}\""),
            None => format!("{} bytes {}", self.audio.len(), self.mime),
        }
    }
}

impl Drop for PlaylistItem {
    fn drop(&mut self) {
        if let Some(hook) = self.disposer.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for PlaylistItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistItem")
            .field("bytes", &self.audio.len())
            .field("mime", &self.mime)
            .field("text", &self.text)
            .field("priority", &self.priority)
            .field("has_disposer", &self.disposer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn disposer_runs_exactly_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let item = PlaylistItem::new(Bytes::from_static(b"x"), "audio/pcm").on_dispose(Box::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));
        drop(item);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn label_prefers_text() {
        let item =
            PlaylistItem::new(Bytes::from_static(b"abc"), "audio/pcm").with_text("hello there");
        assert_eq!(item.label(), "\"hello there\"");
        let raw = PlaylistItem::new(Bytes::from_static(b"abc"), "audio/pcm");
        assert_eq!(raw.label(), "3 bytes audio/pcm");
    }
}
