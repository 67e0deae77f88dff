//! All-or-nothing holder for an unlocked credential session.
//!
//! Providers keep the unlocked store, key, certificate, chain and secret in a
//! single value so that they are only ever present together.

#[derive(Debug)]
pub struct SessionSlot<S> {
    state: Option<S>,
}

impl<S> SessionSlot<S> {
    #[must_use]
    pub fn empty() -> Self {
        Self { state: None }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&S> {
        self.state.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.state.as_mut()
    }

    /// Commit a fully built session, replacing any previous one.
    pub fn open(&mut self, state: S) -> &mut S {
        self.state.insert(state)
    }

    /// Return the open session or build and commit one. A failed build leaves
    /// the slot empty.
    pub fn get_or_open<E>(&mut self, build: impl FnOnce() -> Result<S, E>) -> Result<&mut S, E> {
        let state = match self.state.take() {
            Some(state) => state,
            None => build()?,
        };
        Ok(self.state.insert(state))
    }

    /// Drop every piece of session state at once. Returns whether one was open.
    pub fn clear(&mut self) -> bool {
        self.state.take().is_some()
    }
}

impl<S> Default for SessionSlot<S> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_build_leaves_slot_empty() {
        let mut slot: SessionSlot<u32> = SessionSlot::empty();
        let result: Result<&mut u32, &str> = slot.get_or_open(|| Err("wrong password"));
        assert!(result.is_err());
        assert!(!slot.is_open());
    }

    #[test]
    fn open_session_is_reused_until_cleared() {
        let mut slot = SessionSlot::empty();
        let mut builds = 0;
        for _ in 0..3 {
            slot.get_or_open(|| {
                builds += 1;
                Ok::<_, ()>(7u32)
            })
            .unwrap();
        }
        assert_eq!(builds, 1);
        assert!(slot.clear());
        assert!(!slot.clear());
        assert!(slot.get().is_none());
    }
}
