//! Authenticated calls with transparent, single-flight credential refresh.
//!
//! This module defines [`SessionCoordinator`], which wraps every outbound API
//! call. When a call comes back `401`, the coordinator refreshes the
//! credential once and replays the call, no matter how many calls failed at
//! the same time.
//!
//! ## Responsibilities
//!
//! - Attach the current credential to every request.
//! - Run at most one refresh at a time; park concurrent failures on a wait
//!   queue and replay them when the refresh settles.
//! - Bound retries to one replay per request, and never refresh on behalf of
//!   the refresh endpoint itself.
//! - Bound the refresh with a wall-clock timeout.
//! - Fail every queued request with the refresh error when the refresh fails,
//!   then return to idle so a later request can try again.

use crate::{
    credential::{Credential, CredentialStore, MemoryCredentialStore},
    envelope::{ReissueData, decode_data},
    error::{Error, Result},
    session::refresh::{self, RefreshState, Ticket},
    transport::{Request, Response, Transport},
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;

pub const DEFAULT_REFRESH_ENDPOINT: &str = "/web/reissue";
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Endpoint that exchanges the session marker for a new credential.
    pub refresh_endpoint: String,
    /// Upper bound on a single refresh; hitting it counts as refresh failure.
    pub refresh_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_endpoint: DEFAULT_REFRESH_ENDPOINT.to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

/// Makes every outbound call appear as if the credential were always valid.
///
/// Cloning is cheap and all clones share the same refresh state, credential
/// store and transport.
pub struct SessionCoordinator<T, S = MemoryCredentialStore> {
    inner: Arc<SessionInner<T, S>>,
}

impl<T, S> Clone for SessionCoordinator<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<T, S> {
    transport: T,
    store: S,
    config: SessionConfig,
    state: Mutex<RefreshState>,
}

impl<T, S> SessionCoordinator<T, S>
where
    T: Transport,
    S: CredentialStore + 'static,
{
    pub fn new(transport: T, store: S, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                store,
                config,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Performs `request` with the current credential attached.
    ///
    /// A `401` answer triggers (or joins) a credential refresh, after which
    /// the request is replayed exactly once with the new credential. If a
    /// refresh already replaced the credential while the request was in
    /// flight, the replay goes out right away.
    ///
    /// # Errors
    ///
    /// - [`Error::RefreshFailed`] if the refresh this call depended on failed.
    /// - [`Error::Unauthorized`] if the replay is rejected again, or if
    ///   `request` targets the refresh endpoint.
    /// - [`Error::Status`] for any other non-success status.
    /// - [`Error::Transport`] if the transport itself failed.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(method = %request.method, endpoint = %request.endpoint)))]
    pub async fn call(&self, request: Request) -> Result<Response> {
        let sent_with = self.inner.store.get();
        let response = self
            .inner
            .transport
            .send(&request, sent_with.as_ref())
            .await?;
        if !response.is_unauthorized() {
            return response.into_result(&request.endpoint);
        }

        if self.is_refresh_endpoint(&request.endpoint) {
            return Err(Error::Unauthorized {
                endpoint: request.endpoint,
            });
        }

        // From here on the request counts as retried: the replay below is its
        // only second attempt.
        if self.renewed_since(sent_with.as_ref()) {
            #[cfg(feature = "tracing")]
            tracing::trace!("Credential renewed while in flight, replaying without refresh");
        } else {
            self.refresh().await?;
        }

        let response = self.send(&request).await?;
        if response.is_unauthorized() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Replay rejected after refresh, giving up");
            return Err(Error::Unauthorized {
                endpoint: request.endpoint,
            });
        }
        response.into_result(&request.endpoint)
    }

    /// Refreshes the credential, or waits for the refresh already in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshFailed`] if the refresh failed, timed out or
    /// was abandoned. The credential has been cleared in that case.
    pub async fn refresh(&self) -> Result<()> {
        let ticket = self.inner.state.lock().join();
        match ticket {
            Ticket::Leader(rx) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "Starting credential refresh via {}",
                    self.inner.config.refresh_endpoint
                );
                // The refresh runs detached so that a caller giving up on its
                // own request cannot strand the requests queued behind it.
                tokio::spawn(run_refresh(Arc::clone(&self.inner)));
                refresh::wait(rx).await
            }
            Ticket::Follower(rx) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Refresh in flight, queued");
                refresh::wait(rx).await
            }
        }
    }

    /// Stores the credential obtained from a successful login.
    pub fn set_credential(&self, credential: Credential) {
        self.inner.store.set(credential);
    }

    pub fn clear_credential(&self) {
        self.inner.store.clear();
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.store.get()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().is_refreshing()
    }

    /// Number of requests parked behind the in-flight refresh.
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiting()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        let credential = self.inner.store.get();
        self.inner
            .transport
            .send(request, credential.as_ref())
            .await
    }

    fn is_refresh_endpoint(&self, endpoint: &str) -> bool {
        self.inner.is_refresh_endpoint(endpoint)
    }

    /// A refresh settled after `sent_with` went out and left a different
    /// credential in the store.
    fn renewed_since(&self, sent_with: Option<&Credential>) -> bool {
        self.inner
            .store
            .get()
            .is_some_and(|current| Some(&current) != sent_with)
    }
}

impl<T, S> SessionInner<T, S>
where
    T: Transport,
    S: CredentialStore,
{
    fn is_refresh_endpoint(&self, endpoint: &str) -> bool {
        let path = endpoint.split('?').next().unwrap_or(endpoint);
        path == self.config.refresh_endpoint
    }

    /// Calls the refresh endpoint and updates the store with the outcome.
    async fn refresh_credential(&self) -> Result<()> {
        let endpoint = self.config.refresh_endpoint.as_str();
        let request = Request::post(endpoint);
        let current = self.store.get();

        let exchange = async {
            let response = self.transport.send(&request, current.as_ref()).await?;
            if response.is_unauthorized() {
                return Err(Error::Unauthorized {
                    endpoint: endpoint.to_string(),
                });
            }
            let response = response.into_result(endpoint)?;
            let data: ReissueData = decode_data(endpoint, &response.body)?;
            Ok(Credential::new(data.access_token))
        };

        let outcome = match tokio::time::timeout(self.config.refresh_timeout, exchange).await {
            Ok(Ok(credential)) => {
                self.store.set(credential);
                return Ok(());
            }
            Ok(Err(e)) => Error::refresh(e.to_string()),
            Err(_) => Error::refresh(format!(
                "timed out after {}ms",
                self.config.refresh_timeout.as_millis()
            )),
        };

        self.store.clear();
        Err(outcome)
    }

    fn settle(&self, outcome: &Result<()>) {
        let _settled = self.state.lock().settle(outcome);

        #[cfg(feature = "tracing")]
        {
            match outcome {
                Ok(()) => tracing::debug!("Credential refreshed, replaying {_settled} queued request(s)"),
                Err(e) => tracing::warn!("{e}; rejecting {_settled} queued request(s)"),
            }
        }
    }
}

/// Settles the refresh with a failure if the task ends without settling it
/// (panic in the transport, runtime shutdown).
struct SettleGuard<'a, T: Transport, S: CredentialStore> {
    inner: &'a SessionInner<T, S>,
    armed: bool,
}

impl<T: Transport, S: CredentialStore> SettleGuard<'_, T, S> {
    fn settle(mut self, outcome: Result<()>) {
        self.armed = false;
        self.inner.settle(&outcome);
    }
}

impl<T: Transport, S: CredentialStore> Drop for SettleGuard<'_, T, S> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.store.clear();
            self.inner
                .settle(&Err(Error::refresh("refresh task ended before settling")));
        }
    }
}

async fn run_refresh<T, S>(inner: Arc<SessionInner<T, S>>)
where
    T: Transport,
    S: CredentialStore,
{
    let guard = SettleGuard {
        inner: &inner,
        armed: true,
    };
    let outcome = inner.refresh_credential().await;
    guard.settle(outcome);
}
