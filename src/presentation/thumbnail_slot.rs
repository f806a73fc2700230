//! Binds one display element to the rendition it should show.
//!
//! A slot is reused as the element scrolls; every bind bumps a generation
//! counter and completions carrying an older generation are dropped, so a
//! slow load can never overwrite a newer one.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::entities::{ImageRequest, ImageStatus, PixelSize, RenditionRecord};
use crate::infrastructure::image::{CancelHandle, ImageLoadedEvent, ImageProcessingQueue};

/// Sent when a slot's displayed content changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEvent {
    /// Slot that changed.
    pub slot_id: u64,
    /// Generation the result belongs to.
    pub generation: u64,
    /// New status.
    pub status: ImageStatus,
    /// Size of the new rendition, if any.
    pub size: Option<PixelSize>,
    /// Caller tag from the request.
    pub user_info: Option<String>,
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    handle: Option<CancelHandle>,
    rendition: Option<RenditionRecord>,
    status: ImageStatus,
}

/// View-side controller for one thumbnail.
pub struct ThumbnailSlot {
    id: u64,
    queue: ImageProcessingQueue,
    state: Arc<Mutex<SlotState>>,
    events: Option<mpsc::UnboundedSender<SlotEvent>>,
}

impl ThumbnailSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new(id: u64, queue: ImageProcessingQueue) -> Self {
        Self {
            id,
            queue,
            state: Arc::new(Mutex::new(SlotState::default())),
            events: None,
        }
    }

    /// Reports applied results on `tx`.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SlotEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Starts showing `request`, abandoning whatever was bound before.
    pub fn bind(&self, request: ImageRequest) {
        let (generation, previous) = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.status = ImageStatus::Loading;
            state.rendition = None;
            (state.generation, state.handle.take())
        };
        if let Some(previous) = previous {
            self.queue.cancel(&previous);
        }

        let weak = Arc::downgrade(&self.state);
        let events = self.events.clone();
        let slot_id = self.id;
        let handle = self.queue.load(request, move |event| {
            deliver(&weak, slot_id, generation, event, events.as_ref());
        });

        // A memory hit has already been applied by the time `load` returns.
        let mut state = self.state.lock();
        if state.generation == generation && state.status.is_loading() && handle.is_active() {
            state.handle = Some(handle);
        }
    }

    /// Clears the slot before it is reused for another element.
    pub fn prepare_for_reuse(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.rendition = None;
            state.status = ImageStatus::NotStarted;
            state.handle.take()
        };
        if let Some(previous) = previous {
            self.queue.cancel(&previous);
        }
    }

    /// Slot id used in [`SlotEvent`]s.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Rendition currently shown.
    #[must_use]
    pub fn image(&self) -> Option<RenditionRecord> {
        self.state.lock().rendition.clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ImageStatus {
        self.state.lock().status.clone()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Returns true once a rendition is shown.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.rendition.is_some() && state.status.is_ready()
    }

    /// Returns true while a load is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.lock().status.is_loading()
    }

    /// Returns true if a queued load can still be cancelled.
    #[must_use]
    pub fn has_pending_load(&self) -> bool {
        self.state.lock().handle.is_some()
    }
}

impl Drop for ThumbnailSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.state.lock().handle.take() {
            self.queue.cancel(&handle);
        }
    }
}

impl std::fmt::Debug for ThumbnailSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ThumbnailSlot")
            .field("id", &self.id)
            .field("generation", &state.generation)
            .field("status", &state.status)
            .field("has_image", &state.rendition.is_some())
            .finish_non_exhaustive()
    }
}

fn deliver(
    state: &Weak<Mutex<SlotState>>,
    slot_id: u64,
    generation: u64,
    event: ImageLoadedEvent,
    events: Option<&mpsc::UnboundedSender<SlotEvent>>,
) {
    let Some(state) = state.upgrade() else {
        trace!(slot_id, "Slot gone, dropping rendition");
        return;
    };

    let note = {
        let mut state = state.lock();
        if state.generation != generation {
            trace!(
                slot_id,
                stale = generation,
                current = state.generation,
                "Discarding stale rendition"
            );
            return;
        }

        state.handle = None;
        state.status = if event.rendition.is_some() {
            ImageStatus::Ready
        } else {
            ImageStatus::Failed
        };
        state.rendition = event.rendition;

        SlotEvent {
            slot_id,
            generation,
            status: state.status.clone(),
            size: state.rendition.as_ref().map(|r| r.size),
            user_info: event.request.user_info,
        }
    };

    if let Some(tx) = events {
        let _ = tx.send(note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::domain::entities::{DisplayScale, PointSize, RenditionSource};
    use crate::domain::ports::mocks::{CountingByteProvider, png_bytes};
    use crate::infrastructure::image::QueueConfig;

    async fn setup(provider: Arc<CountingByteProvider>) -> (ImageProcessingQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = QueueConfig {
            cache_dir: Some(temp_dir.path().to_path_buf()),
            ..QueueConfig::default()
        };
        (ImageProcessingQueue::new(config, provider).await.unwrap(), temp_dir)
    }

    fn request(source: &str) -> ImageRequest {
        ImageRequest::new(source, PointSize::new(40.0, 40.0), DisplayScale::ONE)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<SlotEvent>) -> SlotEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for slot event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_bind_applies_rendition() {
        let provider = Arc::new(CountingByteProvider::new().with_image("a", png_bytes(120, 80)));
        let (queue, _temp) = setup(provider).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = ThumbnailSlot::new(7, queue).with_events(tx);

        slot.bind(request("a").with_user_info("row-3"));
        assert!(slot.is_loading());
        assert!(slot.has_pending_load());

        let event = next(&mut rx).await;
        assert_eq!(event.slot_id, 7);
        assert_eq!(event.status, ImageStatus::Ready);
        assert_eq!(event.size, Some(PixelSize::new(60, 40)));
        assert_eq!(event.user_info.as_deref(), Some("row-3"));
        assert!(slot.is_ready());
        assert!(!slot.has_pending_load());
    }

    #[tokio::test]
    async fn test_rebind_shows_only_latest() {
        let provider = Arc::new(
            CountingByteProvider::new()
                .with_image("slow", png_bytes(64, 64))
                .with_image("fast", png_bytes(32, 32)),
        );
        let gate = provider.hold("slow");
        let (queue, _temp) = setup(provider).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = ThumbnailSlot::new(1, queue).with_events(tx);

        slot.bind(request("slow"));
        slot.bind(request("fast"));
        assert_eq!(slot.generation(), 2);

        let event = next(&mut rx).await;
        assert_eq!(event.generation, 2);
        assert_eq!(slot.image().unwrap().size, PixelSize::new(32, 32));

        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(slot.image().unwrap().size, PixelSize::new(32, 32));
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let provider = Arc::new(CountingByteProvider::new().with_image("a", png_bytes(16, 16)));
        let (queue, _temp) = setup(provider).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = ThumbnailSlot::new(2, queue).with_events(tx.clone());
        slot.bind(request("a"));
        next(&mut rx).await;
        slot.prepare_for_reuse();

        // A completion that was already in flight for generation 1.
        let stale = ImageLoadedEvent {
            request: request("a"),
            rendition: Some(RenditionRecord::new(
                Arc::new(image::DynamicImage::new_rgb8(8, 8)),
                RenditionSource::Processed,
            )),
        };
        deliver(&Arc::downgrade(&slot.state), 2, 1, stale, Some(&tx));

        assert_eq!(slot.status(), ImageStatus::NotStarted);
        assert!(slot.image().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_memory_hit_applies_during_bind() {
        let provider = Arc::new(CountingByteProvider::new().with_image("a", png_bytes(40, 40)));
        let (queue, _temp) = setup(provider.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = ThumbnailSlot::new(1, queue.clone()).with_events(tx);
        first.bind(request("a"));
        next(&mut rx).await;

        let second = ThumbnailSlot::new(2, queue);
        second.bind(request("a"));

        assert!(second.is_ready());
        assert!(!second.has_pending_load());
        assert_eq!(second.image().unwrap().source, RenditionSource::Memory);
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_marks_slot_failed() {
        let provider = Arc::new(CountingByteProvider::new());
        let (queue, _temp) = setup(provider).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot = ThumbnailSlot::new(3, queue).with_events(tx);

        slot.bind(request("missing"));
        let event = next(&mut rx).await;

        assert_eq!(event.status, ImageStatus::Failed);
        assert!(slot.status().is_failed());
        assert!(slot.image().is_none());
    }

    #[tokio::test]
    async fn test_prepare_for_reuse_cancels_load() {
        let provider = Arc::new(CountingByteProvider::new().with_image("a", png_bytes(16, 16)));
        let (queue, _temp) = setup(provider.clone()).await;
        let slot = ThumbnailSlot::new(4, queue.clone());

        slot.bind(request("a"));
        slot.prepare_for_reuse();

        assert_eq!(slot.status(), ImageStatus::NotStarted);
        assert!(!slot.has_pending_load());
        tokio::time::timeout(Duration::from_secs(10), async {
            while queue.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_load() {
        let provider = Arc::new(CountingByteProvider::new().with_image("a", png_bytes(16, 16)));
        let (queue, _temp) = setup(provider.clone()).await;

        let slot = ThumbnailSlot::new(5, queue.clone());
        slot.bind(request("a"));
        drop(slot);

        tokio::time::timeout(Duration::from_secs(10), async {
            while queue.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(provider.fetch_count(), 0);
        assert!(queue.memory_cache().peek(&request("a").key).is_none());
    }
}
