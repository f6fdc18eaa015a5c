//! Viewer credential holder.
//!
//! The session layer that logs the viewer in is outside this crate; it writes the
//! bearer token here and every consumer reads the latest value at use time.

use std::sync::Arc;

use parking_lot::RwLock;

/// Re-invoked on every (re)connect attempt so a refreshed token is always used.
pub type TokenFactory = Arc<dyn Fn() -> Option<String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Credentials {
    token: Arc<RwLock<Option<String>>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let credentials = Self::new();
        credentials.set_token(token);
        credentials
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    pub fn token_factory(&self) -> TokenFactory {
        let credentials = self.clone();
        Arc::new(move || credentials.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_sees_tokens_set_after_creation() {
        let credentials = Credentials::new();
        let factory = credentials.token_factory();
        assert_eq!(factory(), None);

        credentials.set_token("first");
        assert_eq!(factory().as_deref(), Some("first"));

        credentials.set_token("refreshed");
        assert_eq!(factory().as_deref(), Some("refreshed"));

        credentials.clear();
        assert!(!credentials.is_authenticated());
        assert_eq!(factory(), None);
    }
}
