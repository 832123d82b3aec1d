//! Scriptable transport for tests.
//!
//! A responder closure decides the outcome of each call up front; the reply
//! is then delivered after an optional delay, so paused-clock tests can make
//! responses arrive in any order.

use crate::{
    credential::Credential,
    error::{Error, Result},
    transport::{Request, Response, Transport},
};
use bytes::Bytes;
use core::{future::Future, time::Duration};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) struct Reply {
    outcome: Result<Response>,
    delay: Duration,
}

impl Reply {
    pub(crate) fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            outcome: Ok(Response::new(status, body.to_string())),
            delay: Duration::ZERO,
        }
    }

    /// A `200` envelope around `data`.
    pub(crate) fn data(data: serde_json::Value) -> Self {
        Self::json(
            200,
            serde_json::json!({ "code": 200, "status": "OK", "message": "ok", "data": data }),
        )
    }

    pub(crate) fn token(token: &str) -> Self {
        Self::data(serde_json::json!({ "accessToken": token }))
    }

    pub(crate) fn status(status: u16) -> Self {
        Self {
            outcome: Ok(Response::new(status, Bytes::new())),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn fail(context: &str) -> Self {
        Self {
            outcome: Err(Error::Transport {
                context: context.to_string(),
            }),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn after(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub(crate) endpoint: String,
    pub(crate) credential: Option<String>,
    pub(crate) body: Option<Bytes>,
}

type Responder = dyn Fn(&Request, Option<&Credential>) -> Reply + Send + Sync;

#[derive(Clone)]
pub(crate) struct MockTransport {
    responder: Arc<Responder>,
    log: Arc<Mutex<Vec<Call>>>,
    // Endpoints whose reply was delivered (not dropped while pending).
    completed: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&Request, Option<&Credential>) -> Reply + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn completed_to(&self, endpoint: &str) -> usize {
        self.completed
            .lock()
            .iter()
            .filter(|done| done.as_str() == endpoint)
            .count()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.log.lock().clone()
    }

    pub(crate) fn calls_to(&self, endpoint: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> impl Future<Output = Result<Response>> + Send {
        self.log.lock().push(Call {
            endpoint: request.endpoint.clone(),
            credential: credential.map(|c| c.as_str().to_string()),
            body: request.body.clone(),
        });
        let reply = (self.responder)(request, credential);
        let completed = Arc::clone(&self.completed);
        let endpoint = request.endpoint.clone();
        async move {
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            completed.lock().push(endpoint);
            reply.outcome
        }
    }
}
