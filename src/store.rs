use dashmap::DashMap;

use crate::session::{UploadMode, UploadSession, UploadState};

/// Registry of upload sessions, injected into the handlers through `AppState`.
///
/// `update` runs its closure with exclusive access to one session; readers
/// (`get`, `list`) get clones so no lock outlives the call.
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: UploadSession);

    fn get(&self, id: &str) -> Option<UploadSession>;

    fn contains(&self, id: &str) -> bool;

    /// live chunked session for a `(file_name, expected_bytes)` pair, failed ones excluded
    fn find_resumable(&self, file_name: &str, expected_bytes: u64) -> Option<String>;

    /// returns false when the id is unknown
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut UploadSession)) -> bool;

    /// all sessions, oldest first
    fn list(&self) -> Vec<UploadSession>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl dyn SessionStore {
    /// `update` with a return value
    pub fn modify<R>(&self, id: &str, f: impl FnOnce(&mut UploadSession) -> R) -> Option<R> {
        let mut f = Some(f);
        let mut out = None;
        self.update(id, &mut |session: &mut UploadSession| {
            if let Some(f) = f.take() {
                out = Some(f(session));
            }
        });
        out
    }
}

/// In-memory store; sessions live until the process exits.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, UploadSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: UploadSession) {
        tracing::trace!("Storing session {} for {}", session.id, session.file_name);
        self.sessions.insert(session.id.clone(), session);
    }

    fn get(&self, id: &str) -> Option<UploadSession> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    fn find_resumable(&self, file_name: &str, expected_bytes: u64) -> Option<String> {
        self.sessions
            .iter()
            .filter(|s| {
                s.file_name == file_name
                    && s.expected_bytes() == expected_bytes
                    && s.state() != UploadState::Failed
                    && s.mode == UploadMode::Chunked
            })
            .max_by_key(|s| s.created_at)
            .map(|s| s.id.clone())
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut UploadSession)) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    fn list(&self) -> Vec<UploadSession> {
        let mut sessions: Vec<UploadSession> = self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
