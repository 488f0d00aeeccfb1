// Signed-in identity
// The backend's auth service owns sessions; the storefront only needs to know who, if anyone,
// is signed in right now.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    // Bearer token issued by the auth service; never written out
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

// Identity held for the lifetime of a browsing session, updated on auth state changes
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!("User {} signed in", identity.id);
        *self.current.write() = Some(identity);
    }

    // Returns the identity that was signed out, if any
    pub fn sign_out(&self) -> Option<Identity> {
        let previous = self.current.write().take();
        if let Some(identity) = &previous {
            info!("User {} signed out", identity.id);
        }
        previous
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.current.read().clone()
    }
}
