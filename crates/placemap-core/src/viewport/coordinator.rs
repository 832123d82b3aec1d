//! Latest-wins viewport queries.
//!
//! This module defines [`ViewportQueryCoordinator`], which turns a stream of
//! viewport changes into data queries and guarantees that the visible result
//! always belongs to the most recently issued query.
//!
//! ## Responsibilities
//!
//! - Debounce bursts of viewport-changed signals into one query.
//! - Stamp every query with a new generation and fan it out into one
//!   sub-query per active category, through the [`SessionCoordinator`].
//! - Discard results of superseded generations without side effects.
//! - Tolerate a failed category: it contributes nothing and is reported as
//!   degraded, the other categories are still shown.
//! - Replace the visible result atomically once every sub-query of the
//!   current generation has settled.
//!
//! Preemption is implicit. A newer generation does not abort older network
//! calls unless [`ViewportConfig::cancel_in_flight`] is set; their results are
//! dropped on arrival instead.

use crate::{
    credential::{CredentialStore, MemoryCredentialStore},
    envelope::decode_data,
    error::{Error, Result},
    session::SessionCoordinator,
    transport::{Request, Transport},
    viewport::{
        generation::QueryGeneration,
        timer::PendingTimer,
        types::{Category, Place, QueryPayload, ViewportDescriptor, VisibleResult},
    },
};
use core::time::Duration;
use futures::future::join_all;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct ViewportConfig {
    /// Quiet period a burst of viewport changes must respect before a query
    /// is issued.
    pub debounce: Duration,
    /// Abort the sub-queries of a generation as soon as a newer one is
    /// issued, instead of only discarding their results.
    pub cancel_in_flight: bool,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            cancel_in_flight: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewportPhase {
    Idle,
    /// A debounce timer is armed.
    Debouncing,
    /// The given generation has sub-queries outstanding.
    Querying(u64),
}

/// Receiver side of the "visible result replaced" notification.
pub type VisibleReceiver = watch::Receiver<Option<Arc<VisibleResult>>>;

/// Issues viewport queries and publishes only the latest one's result.
///
/// Cloning is cheap; clones share generation, timer and visible state.
pub struct ViewportQueryCoordinator<T, S = MemoryCredentialStore> {
    inner: Arc<ViewportInner<T, S>>,
}

impl<T, S> Clone for ViewportQueryCoordinator<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ViewportInner<T, S> {
    session: SessionCoordinator<T, S>,
    config: ViewportConfig,
    generation: QueryGeneration,
    settled: AtomicU64,
    timer: Mutex<PendingTimer>,
    // Held while advancing the generation so token and generation move
    // together.
    in_flight: Mutex<Option<CancellationToken>>,
    visible: watch::Sender<Option<Arc<VisibleResult>>>,
}

impl<T, S> ViewportQueryCoordinator<T, S>
where
    T: Transport,
    S: CredentialStore + 'static,
{
    pub fn new(session: SessionCoordinator<T, S>, config: ViewportConfig) -> Self {
        let (visible, _) = watch::channel(None);
        Self {
            inner: Arc::new(ViewportInner {
                session,
                config,
                generation: QueryGeneration::new(),
                settled: AtomicU64::new(0),
                timer: Mutex::new(PendingTimer::default()),
                in_flight: Mutex::new(None),
                visible,
            }),
        }
    }

    /// Restarts the debounce window for `descriptor`.
    ///
    /// Any armed timer is cancelled before it fires; when the new one fires,
    /// [`issue_query`](Self::issue_query) runs with `descriptor`.
    pub fn on_viewport_changed(&self, descriptor: ViewportDescriptor) {
        let delay = self.inner.config.debounce;
        let weak: Weak<ViewportInner<T, S>> = Arc::downgrade(&self.inner);

        let mut timer = self.inner.timer.lock();
        let restarted = timer.arm(|seq| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                // Issued under the timer lock, so a direct query either
                // cancels this one first or supersedes it.
                let mut timer = inner.timer.lock();
                if timer.fire(seq) {
                    ViewportInner::issue(&inner, descriptor);
                }
            })
        });
        if restarted {
            #[cfg(feature = "tracing")]
            tracing::trace!("Debounce window restarted");
        }
    }

    /// Issues a query for `descriptor` immediately and returns its
    /// generation.
    ///
    /// Used for user-initiated refreshes (filter change, login-state change).
    /// An armed debounce timer is cancelled, since this query reflects a newer
    /// state than the one it captured.
    pub fn issue_query(&self, descriptor: ViewportDescriptor) -> u64 {
        let mut timer = self.inner.timer.lock();
        timer.cancel();
        ViewportInner::issue(&self.inner, descriptor)
    }

    /// Subscribes to visible-result replacements.
    pub fn subscribe(&self) -> VisibleReceiver {
        self.inner.visible.subscribe()
    }

    /// The result currently shown, if any generation has been applied yet.
    pub fn visible(&self) -> Option<Arc<VisibleResult>> {
        self.inner.visible.borrow().clone()
    }

    pub fn current_generation(&self) -> u64 {
        self.inner.generation.current()
    }

    pub fn phase(&self) -> ViewportPhase {
        if self.inner.timer.lock().is_live() {
            return ViewportPhase::Debouncing;
        }
        let current = self.inner.generation.current();
        if self.inner.settled.load(Ordering::Acquire) < current {
            ViewportPhase::Querying(current)
        } else {
            ViewportPhase::Idle
        }
    }

    pub fn session(&self) -> &SessionCoordinator<T, S> {
        &self.inner.session
    }
}

impl<T, S> ViewportInner<T, S>
where
    T: Transport,
    S: CredentialStore + 'static,
{
    fn issue(this: &Arc<Self>, descriptor: ViewportDescriptor) -> u64 {
        let token = CancellationToken::new();
        let generation = {
            let mut in_flight = this.in_flight.lock();
            let generation = this.generation.advance();
            if let Some(previous) = in_flight.replace(token.clone()) {
                if this.config.cancel_in_flight {
                    previous.cancel();
                }
            }
            generation
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Issuing viewport query generation {generation} ({:?}, zoom {})",
            descriptor.filter,
            descriptor.zoom_level
        );

        tokio::spawn(Self::run_generation(
            Arc::clone(this),
            generation,
            descriptor,
            token,
        ));
        generation
    }

    async fn run_generation(
        this: Arc<Self>,
        generation: u64,
        descriptor: ViewportDescriptor,
        token: CancellationToken,
    ) {
        let payload = descriptor.payload();
        let categories = descriptor.filter.categories();

        let outcomes = join_all(
            categories
                .iter()
                .map(|&category| this.sub_query(generation, category, &payload, &token)),
        )
        .await;

        let mut places = Vec::new();
        let mut degraded = Vec::new();
        let mut superseded = false;

        for (&category, outcome) in categories.iter().zip(outcomes) {
            match outcome {
                Ok(records) => places.extend(
                    records
                        .into_iter()
                        .map(|record| Place { category, record }),
                ),
                Err(e) if e.is_superseded() => superseded = true,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "{category} places unavailable for generation {generation}: {_e}"
                    );
                    degraded.push(category);
                }
            }
        }

        if superseded {
            #[cfg(feature = "tracing")]
            tracing::trace!("Generation {generation} superseded, discarded");
        } else {
            let _applied = this.publish(VisibleResult {
                generation,
                descriptor,
                places,
                degraded,
            });

            #[cfg(feature = "tracing")]
            {
                if _applied {
                    tracing::debug!("Generation {generation} applied");
                } else {
                    tracing::trace!("Generation {generation} arrived stale, discarded");
                }
            }
        }

        // Settled only after publishing, so an idle phase implies the visible
        // result is final.
        this.settled.fetch_max(generation, Ordering::AcqRel);
    }

    async fn sub_query(
        &self,
        generation: u64,
        category: Category,
        payload: &QueryPayload,
        token: &CancellationToken,
    ) -> Result<Vec<serde_json::Value>> {
        self.ensure_current(generation)?;

        let endpoint = category.endpoint();
        let request = Request::post_json(endpoint, payload)?;

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(self.superseded(generation)),
            response = self.session.call(request) => match response {
                Ok(response) => response,
                Err(e) => {
                    // A failure that arrives for an outdated generation is
                    // just another stale response.
                    self.ensure_current(generation)?;
                    return Err(e);
                }
            },
        };

        self.ensure_current(generation)?;
        let records: Option<Vec<serde_json::Value>> = decode_data(endpoint, &response.body)?;
        Ok(records.unwrap_or_default())
    }

    /// Replaces the visible result, unless `result` is no longer the latest
    /// generation or something newer is already shown.
    fn publish(&self, result: VisibleResult) -> bool {
        let generation = result.generation;
        let result = Arc::new(result);
        self.visible.send_if_modified(|shown| {
            let newer_shown = shown
                .as_ref()
                .is_some_and(|current| current.generation >= generation);
            if newer_shown || !self.generation.is_current(generation) {
                return false;
            }
            *shown = Some(result);
            true
        })
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.generation.is_current(generation) {
            Ok(())
        } else {
            Err(self.superseded(generation))
        }
    }

    fn superseded(&self, generation: u64) -> Error {
        Error::Superseded {
            generation,
            current: self.generation.current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credential::Credential,
        mock::{MockTransport, Reply},
        session::SessionConfig,
        viewport::types::{BoundingBox, Coordinate, PlaceFilter},
    };

    fn coordinator(transport: &MockTransport) -> ViewportQueryCoordinator<MockTransport> {
        let store = MemoryCredentialStore::with_credential(Credential::new("token"));
        let session = SessionCoordinator::new(transport.clone(), store, SessionConfig::default());
        ViewportQueryCoordinator::new(session, ViewportConfig::default())
    }

    fn payload() -> QueryPayload {
        let bounds = BoundingBox::from_corners(
            Coordinate::new(37.50, 126.90),
            Coordinate::new(37.60, 127.00),
        );
        ViewportDescriptor::new(bounds, 6, PlaceFilter::Official).payload()
    }

    #[tokio::test(start_paused = true)]
    async fn failure_overtaken_in_flight_reads_as_superseded() {
        let transport = MockTransport::new(|_, _| Reply::status(500).after(300));
        let viewport = coordinator(&transport);
        let inner = &viewport.inner;
        let token = CancellationToken::new();
        let payload = payload();

        let generation = inner.generation.advance();
        let overtake = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            inner.generation.advance();
        };
        let (outcome, ()) = tokio::join!(
            inner.sub_query(generation, Category::Official, &payload, &token),
            overtake,
        );

        assert_eq!(
            outcome.unwrap_err(),
            Error::Superseded {
                generation: 1,
                current: 2
            }
        );

        // The same failure for the current generation is reported as is.
        let err = inner
            .sub_query(2, Category::Official, &payload, &token)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::Status {
                endpoint: Category::Official.endpoint().into(),
                status: 500
            }
        );
    }
}
