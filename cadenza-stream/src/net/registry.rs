//! Stream-token session registry
//!
//! Maps the short-lived per-connection stream token to its session so the
//! dedicated channel server can authenticate and attach. Entries live
//! exactly as long as the owning control connection.

use crate::playback::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, token: Uuid, session: Arc<Session>) {
        self.inner.lock().unwrap().insert(token, session);
    }

    pub fn deregister(&self, token: &Uuid) {
        self.inner.lock().unwrap().remove(token);
    }

    pub fn lookup(&self, token: &Uuid) -> Option<Arc<Session>> {
        self.inner.lock().unwrap().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
