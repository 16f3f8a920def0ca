//! Preview surface with an explicit readiness signal
//!
//! The surface owner flips it to ready once it can display video; the
//! controller awaits that signal instead of sleeping and hoping.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::controller::CaptureError;
use super::traits::RenderSurface;

/// A render surface driven by a readiness flag
pub struct ReadinessSurface {
    ready_tx: watch::Sender<bool>,
    attached: Mutex<Option<String>>,
}

impl ReadinessSurface {
    /// Create a surface that is not ready yet
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            ready_tx,
            attached: Mutex::new(None),
        }
    }

    /// Create a surface that can accept a stream immediately (headless use)
    pub fn ready_now() -> Self {
        let surface = Self::new();
        surface.set_ready(true);
        surface
    }

    /// Mark the surface ready or not. Going unready detaches the stream.
    pub fn set_ready(&self, ready: bool) {
        self.ready_tx.send_replace(ready);
        if !ready {
            self.detach();
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }
}

impl Default for ReadinessSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderSurface for ReadinessSurface {
    async fn ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn attach(&self, stream_id: &str) -> Result<(), CaptureError> {
        if !self.is_ready() {
            return Err(CaptureError::SurfaceUnavailable);
        }
        *self.attached.lock() = Some(stream_id.to_string());
        tracing::debug!("Stream {} attached to preview surface", stream_id);
        Ok(())
    }

    fn detach(&self) {
        if let Some(id) = self.attached.lock().take() {
            tracing::debug!("Stream {} detached from preview surface", id);
        }
    }

    fn attached(&self) -> Option<String> {
        self.attached.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_attach_requires_ready() {
        let surface = ReadinessSurface::new();
        assert!(matches!(
            surface.attach("cam-1"),
            Err(CaptureError::SurfaceUnavailable)
        ));

        surface.set_ready(true);
        surface.attach("cam-1").unwrap();
        assert_eq!(surface.attached().as_deref(), Some("cam-1"));

        surface.detach();
        surface.detach();
        assert!(surface.attached().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_resolves_when_flagged() {
        let surface = Arc::new(ReadinessSurface::new());
        let flagger = surface.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flagger.set_ready(true);
        });

        tokio::time::timeout(Duration::from_millis(100), surface.ready())
            .await
            .expect("surface should become ready");
    }

    #[test]
    fn test_going_unready_detaches() {
        let surface = ReadinessSurface::ready_now();
        surface.attach("cam-1").unwrap();
        surface.set_ready(false);
        assert!(surface.attached().is_none());
    }
}
