// SPDX-License-Identifier: CEPL-1.0

/// Lifecycle of the presentable image set.
///
/// `Uninitialized -> Ready -> (Stale -> Ready)* -> Destroyed`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurfaceState {
    #[default]
    Uninitialized,
    Ready,
    /// Window resized, or acquire/present said the images no longer match.
    Stale,
    Destroyed,
}

impl SurfaceState {
    /// Only a live surface can go stale; a destroyed one stays destroyed.
    pub fn mark_stale(&mut self) {
        if *self == SurfaceState::Ready {
            *self = SurfaceState::Stale;
        }
    }

    pub fn mark_ready(&mut self) {
        if *self != SurfaceState::Destroyed {
            *self = SurfaceState::Ready;
        }
    }

    pub fn mark_destroyed(&mut self) {
        *self = SurfaceState::Destroyed;
    }

    pub fn is_ready(&self) -> bool {
        *self == SurfaceState::Ready
    }

    pub fn needs_recreate(&self) -> bool {
        *self == SurfaceState::Stale
    }
}

/// Backend-neutral reading of an acquire/present result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_goes_stale_and_back() {
        let mut s = SurfaceState::default();
        s.mark_stale();
        assert_eq!(s, SurfaceState::Uninitialized);

        s.mark_ready();
        s.mark_stale();
        assert!(s.needs_recreate());

        s.mark_ready();
        assert!(s.is_ready());
    }

    #[test]
    fn destroyed_is_terminal() {
        let mut s = SurfaceState::Ready;
        s.mark_destroyed();
        s.mark_ready();
        s.mark_stale();
        assert_eq!(s, SurfaceState::Destroyed);
    }

    #[test]
    fn suboptimal_and_out_of_date_both_recreate() {
        assert!(!PresentStatus::Optimal.needs_recreate());
        assert!(PresentStatus::Suboptimal.needs_recreate());
        assert!(PresentStatus::OutOfDate.needs_recreate());
    }
}
