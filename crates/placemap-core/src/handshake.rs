//! Waiting for the external login window.
//!
//! The login flow runs outside the client (a browser window, a device flow)
//! and reports back by posting a [`HandshakeMessage`] on a [`Handshake`].
//! [`Handshake::wait`] suspends until a matching message arrives or the
//! timeout elapses; a timeout counts as [`HandshakeOutcome::Fail`].
//!
//! The listener registered by `wait` is removed on every exit path: message,
//! timeout, or the waiting future being dropped.

use core::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::oneshot;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(120);

pub const OAUTH_SUCCESS: &str = "oauth:success";
pub const OAUTH_FAIL: &str = "oauth:fail";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeOutcome {
    Success,
    Fail,
}

/// A message posted by the login window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    #[serde(rename = "type")]
    pub kind: String,
}

impl HandshakeMessage {
    pub fn success() -> Self {
        Self {
            kind: OAUTH_SUCCESS.to_string(),
        }
    }

    pub fn fail() -> Self {
        Self {
            kind: OAUTH_FAIL.to_string(),
        }
    }

    /// The outcome this message reports, or `None` for unrelated messages.
    pub fn outcome(&self) -> Option<HandshakeOutcome> {
        match self.kind.as_str() {
            OAUTH_SUCCESS => Some(HandshakeOutcome::Success),
            OAUTH_FAIL => Some(HandshakeOutcome::Fail),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    senders: HashMap<u64, oneshot::Sender<HandshakeOutcome>>,
}

/// Message channel between the login window and the client.
///
/// Cloning is cheap; clones share listeners.
#[derive(Clone)]
pub struct Handshake {
    expected_origin: Option<Arc<str>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl Handshake {
    /// Accepts messages only from `origin`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            expected_origin: Some(Arc::from(origin.into())),
            listeners: Arc::default(),
        }
    }

    /// Accepts messages from any origin.
    pub fn any_origin() -> Self {
        Self {
            expected_origin: None,
            listeners: Arc::default(),
        }
    }

    /// Delivers `message` from `origin` to every waiting listener.
    ///
    /// Messages from another origin, or of an unrelated type, are ignored.
    /// Returns the number of listeners resolved.
    pub fn post(&self, origin: &str, message: &HandshakeMessage) -> usize {
        if self
            .expected_origin
            .as_deref()
            .is_some_and(|expected| expected != origin)
        {
            #[cfg(feature = "tracing")]
            tracing::trace!("Ignoring handshake message from unexpected origin {origin}");
            return 0;
        }
        let Some(outcome) = message.outcome() else {
            return 0;
        };

        let senders: Vec<_> = self.listeners.lock().senders.drain().collect();
        let mut resolved = 0;
        for (_, sender) in senders {
            if sender.send(outcome).is_ok() {
                resolved += 1;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Handshake reported {outcome:?} to {resolved} listener(s)");
        resolved
    }

    /// Waits for the login outcome, treating a timeout as failure.
    pub async fn wait(&self, timeout: Duration) -> HandshakeOutcome {
        let (tx, rx) = oneshot::channel();
        let _guard = self.register(tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => HandshakeOutcome::Fail,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::info!("Login handshake timed out after {}s", timeout.as_secs());
                HandshakeOutcome::Fail
            }
        }
    }

    /// Number of listeners currently waiting.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().senders.len()
    }

    fn register(&self, sender: oneshot::Sender<HandshakeOutcome>) -> ListenerGuard<'_> {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.senders.insert(id, sender);
        ListenerGuard {
            listeners: &self.listeners,
            id,
        }
    }
}

struct ListenerGuard<'a> {
    listeners: &'a Mutex<Listeners>,
    id: u64,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.listeners.lock().senders.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://placemap.app";

    fn post_after(handshake: &Handshake, millis: u64, origin: &'static str, message: HandshakeMessage) {
        let handshake = handshake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            handshake.post(origin, &message);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn success_message_resolves_and_removes_listener() {
        let handshake = Handshake::new(ORIGIN);
        post_after(&handshake, 10, ORIGIN, HandshakeMessage::success());

        let outcome = handshake.wait(DEFAULT_HANDSHAKE_TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Success);
        assert_eq!(handshake.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_message_resolves_as_fail() {
        let handshake = Handshake::new(ORIGIN);
        post_after(&handshake, 10, ORIGIN, HandshakeMessage::fail());

        assert_eq!(
            handshake.wait(DEFAULT_HANDSHAKE_TIMEOUT).await,
            HandshakeOutcome::Fail
        );
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_origin_and_unrelated_messages_are_ignored() {
        let handshake = Handshake::new(ORIGIN);
        post_after(&handshake, 5, "https://evil.example", HandshakeMessage::success());
        post_after(
            &handshake,
            10,
            ORIGIN,
            HandshakeMessage {
                kind: "resize".to_string(),
            },
        );
        post_after(&handshake, 20, ORIGIN, HandshakeMessage::fail());

        assert_eq!(
            handshake.wait(DEFAULT_HANDSHAKE_TIMEOUT).await,
            HandshakeOutcome::Fail
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_fail_and_removes_listener() {
        let handshake = Handshake::new(ORIGIN);

        let outcome = handshake.wait(DEFAULT_HANDSHAKE_TIMEOUT).await;

        assert_eq!(outcome, HandshakeOutcome::Fail);
        assert_eq!(handshake.listener_count(), 0);
        // A late message finds nobody to resolve.
        assert_eq!(handshake.post(ORIGIN, &HandshakeMessage::success()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_removes_listener() {
        let handshake = Handshake::any_origin();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), handshake.wait(DEFAULT_HANDSHAKE_TIMEOUT))
                .await;

        assert!(abandoned.is_err());
        assert_eq!(handshake.listener_count(), 0);
    }

    #[test]
    fn message_reads_from_window_payload() {
        let message: HandshakeMessage =
            serde_json::from_str(r#"{ "type": "oauth:success" }"#).unwrap();
        assert_eq!(message.outcome(), Some(HandshakeOutcome::Success));
    }
}
