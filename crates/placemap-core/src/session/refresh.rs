//! Refresh state machine and its wait queue.
//!
//! [`RefreshState`] is only ever touched under the coordinator's mutex and
//! never across an `.await`. Settling is synchronous: every waiter is sent its
//! outcome in enqueue order, the triggering request last.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use tokio::sync::oneshot;

pub(crate) type Waiter = oneshot::Sender<Result<()>>;

/// How a caller takes part in a refresh.
pub(crate) enum Ticket {
    /// The caller moved the state to refreshing and must start the refresh.
    Leader(oneshot::Receiver<Result<()>>),
    /// A refresh is already in flight; the caller waits for it.
    Follower(oneshot::Receiver<Result<()>>),
}

#[derive(Default)]
pub(crate) struct RefreshState {
    refreshing: bool,
    queue: VecDeque<Waiter>,
    leader: Option<Waiter>,
}

impl RefreshState {
    /// Joins the in-flight refresh, or becomes the leader of a new one when
    /// idle.
    pub(crate) fn join(&mut self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        if self.refreshing {
            self.queue.push_back(tx);
            Ticket::Follower(rx)
        } else {
            self.refreshing = true;
            self.leader = Some(tx);
            Ticket::Leader(rx)
        }
    }

    /// Returns to idle and delivers `outcome` to every waiter, queued
    /// requests first, then the request that triggered the refresh.
    ///
    /// Returns the number of queued waiters that were settled.
    pub(crate) fn settle(&mut self, outcome: &Result<()>) -> usize {
        self.refreshing = false;
        let settled = self.queue.len();
        for waiter in self.queue.drain(..) {
            // A waiter whose caller went away has nothing left to replay.
            let _ = waiter.send(outcome.clone());
        }
        if let Some(leader) = self.leader.take() {
            let _ = leader.send(outcome.clone());
        }
        settled
    }

    pub(crate) const fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub(crate) fn waiting(&self) -> usize {
        self.queue.len()
    }
}

pub(crate) async fn wait(ticket: oneshot::Receiver<Result<()>>) -> Result<()> {
    ticket
        .await
        .map_err(|_| Error::refresh("refresh was abandoned before it settled"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_join_leads_and_later_joins_queue() {
        let mut state = RefreshState::default();
        assert!(matches!(state.join(), Ticket::Leader(_)));
        assert!(state.is_refreshing());
        assert!(matches!(state.join(), Ticket::Follower(_)));
        assert!(matches!(state.join(), Ticket::Follower(_)));
        assert_eq!(state.waiting(), 2);
    }

    #[test]
    fn settle_delivers_to_everyone_and_goes_idle() {
        let mut state = RefreshState::default();
        let Ticket::Leader(mut leader) = state.join() else {
            panic!("expected leader");
        };
        let mut followers: Vec<_> = (0..3)
            .map(|_| match state.join() {
                Ticket::Follower(rx) => rx,
                Ticket::Leader(_) => panic!("expected follower"),
            })
            .collect();

        let failure = Err(Error::refresh("denied"));
        assert_eq!(state.settle(&failure), 3);
        assert!(!state.is_refreshing());
        assert_eq!(state.waiting(), 0);

        for rx in &mut followers {
            assert_eq!(rx.try_recv().unwrap(), failure);
        }
        assert_eq!(leader.try_recv().unwrap(), failure);

        // Idle again: the next join starts a fresh refresh.
        assert!(matches!(state.join(), Ticket::Leader(_)));
    }

    #[test]
    fn settling_with_dropped_waiters_is_harmless() {
        let mut state = RefreshState::default();
        drop(state.join());
        drop(state.join());
        assert_eq!(state.settle(&Ok(())), 1);
        assert!(!state.is_refreshing());
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_refresh_failure() {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        drop(tx);
        assert!(wait(rx).await.unwrap_err().is_refresh_failure());
    }
}
