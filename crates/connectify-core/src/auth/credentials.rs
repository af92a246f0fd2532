use std::fmt;
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
struct Slot {
    token: Option<String>,
    /// Bumped on every write, so late writers can tell they were overtaken
    generation: u64,
}

/// Holds the current access token in process memory.
///
/// Shared behind an `Arc` by the request pipeline, the refresh coordinator
/// and the session controller. Last writer wins; readers re-read on every
/// call instead of caching the value.
#[derive(Default)]
pub struct CredentialStore {
    slot: RwLock<Slot>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held token
    pub fn set(&self, token: impl Into<String>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = Some(token.into());
        slot.generation += 1;
    }

    /// Replace the held token only if nothing has written since `generation`.
    ///
    /// Returns false, leaving the store untouched, when a login, logout or
    /// other write got there first.
    pub fn set_if_generation(&self, generation: u64, token: impl Into<String>) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return false;
        }
        slot.token = Some(token.into());
        slot.generation += 1;
        true
    }

    /// Current token, if any
    pub fn get(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = None;
        slot.generation += 1;
    }

    pub fn is_present(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_some()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("present", &self.is_present())
            .finish()
    }
}
