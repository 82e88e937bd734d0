use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable view of the selection taken at one instant.
pub type SelectionSnapshot = Arc<BTreeSet<u32>>;

/// Product ids the client currently has selected.
///
/// Written by the request handlers, read by the capture loop. Writers swap
/// in a whole new set, so a snapshot is always one consistent value and
/// readers never block on a writer for longer than a pointer copy.
#[derive(Clone, Debug, Default)]
pub struct SelectionContext {
    current: Arc<RwLock<SelectionSnapshot>>,
}

impl SelectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, ids: impl IntoIterator<Item = u32>) {
        let next: SelectionSnapshot = Arc::new(ids.into_iter().collect());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
