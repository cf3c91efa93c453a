use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use rocket::tokio::sync::Mutex as AsyncMutex;
use serde::{Deserialize, Serialize};

use super::workflow::VerificationSession;

/// Opaque random identifier for a verification session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(u128);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(Self)
    }
}

impl TryFrom<String> for SessionId {
    type Error = std::num::ParseIntError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

pub type SharedSession = Arc<AsyncMutex<VerificationSession>>;

struct Entry {
    session: SharedSession,
    last_seen: Instant,
}

/// Live verification sessions, each isolated behind its own lock.
///
/// Sessions idle for longer than the TTL are dropped, which wipes any
/// identity number they were holding.
pub struct SessionStore {
    ttl: Duration,
    sessions: DashMap<SessionId, Entry>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
        }
    }

    /// Begin a fresh session in the `Input` state.
    pub fn start(&self) -> SessionId {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| now.duration_since(entry.last_seen) < self.ttl);
        let expired = before.saturating_sub(self.sessions.len());
        if expired > 0 {
            debug!("Expired {expired} idle sessions");
        }

        loop {
            let id = SessionId::random();
            if let MapEntry::Vacant(slot) = self.sessions.entry(id) {
                slot.insert(Entry {
                    session: SharedSession::default(),
                    last_seen: now,
                });
                return id;
            }
        }
    }

    /// Look up a live session, refreshing its idle timer.
    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        let now = Instant::now();
        match self.sessions.entry(id) {
            MapEntry::Occupied(mut slot) => {
                if now.duration_since(slot.get().last_seen) < self.ttl {
                    let entry = slot.get_mut();
                    entry.last_seen = now;
                    Some(entry.session.clone())
                } else {
                    slot.remove();
                    None
                }
            }
            MapEntry::Vacant(_) => None,
        }
    }

    /// Discard a session. Returns whether it existed.
    pub fn end(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
