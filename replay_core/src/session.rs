use std::sync::Arc;

use tracing::info;

use crate::surface::ExecutionSurface;

/// Releases the surface exactly once, on whichever path leaves the replay.
pub struct SessionGuard {
    surface: Arc<dyn ExecutionSurface>,
    released: bool,
}

impl SessionGuard {
    pub fn new(surface: Arc<dyn ExecutionSurface>) -> Self {
        Self {
            surface,
            released: false,
        }
    }

    pub fn surface(&self) -> &Arc<dyn ExecutionSurface> {
        &self.surface
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.surface.release();
            info!(target: "replay::executor", "session.released");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::DryRunSurface;

    #[test]
    fn release_happens_once() {
        let surface = Arc::new(DryRunSurface::new());
        let guard = SessionGuard::new(surface.clone());
        guard.release();
        assert_eq!(surface.release_count(), 1);
    }

    #[test]
    fn unwinding_releases_the_session() {
        let surface = Arc::new(DryRunSurface::new());
        let inner = surface.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = SessionGuard::new(inner);
            panic!("replay aborted");
        }));
        assert!(outcome.is_err());
        assert_eq!(surface.release_count(), 1);
    }
}
