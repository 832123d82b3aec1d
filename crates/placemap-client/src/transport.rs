//! HTTP transport over `reqwest`.
//!
//! The client keeps a cookie jar, so the HttpOnly session cookie set at login
//! travels with every refresh call without the core ever seeing it.

use crate::telemetry;
use core::{future::Future, time::Duration};
use placemap_core::{Credential, Error, Method, Request, Response, Result, Transport};
use reqwest::{Client, Url, header::CONTENT_TYPE};

pub struct HttpTransport {
    client: Client,
    base: Url,
    refresh_endpoint: String,
}

impl HttpTransport {
    /// Builds a transport resolving every endpoint against `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be created.
    pub fn new(base: Url, refresh_endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(concat!("placemap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport {
                context: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base,
            refresh_endpoint: refresh_endpoint.into(),
        })
    }

    /// `base` joined with `endpoint`, keeping the base path
    /// (`http://host/api` + `/web/reissue` = `http://host/api/web/reissue`).
    pub fn url(&self, endpoint: &str) -> Result<Url> {
        let joined = format!("{}{}", self.base.as_str().trim_end_matches('/'), endpoint);
        Url::parse(&joined).map_err(|e| Error::Transport {
            context: format!("invalid URL `{joined}`: {e}"),
        })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> impl Future<Output = Result<Response>> + Send {
        let client = self.client.clone();
        let url = self.url(&request.endpoint);
        let method = request.method;
        let body = request.body.clone();
        let bearer = credential.map(|c| c.as_str().to_string());
        let endpoint = request.endpoint.clone();
        let is_refresh = request.endpoint == self.refresh_endpoint;

        async move {
            let url = url?;
            let mut builder = match method {
                Method::Get => client.get(url),
                Method::Post => client.post(url),
            };
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = body {
                builder = builder.header(CONTENT_TYPE, "application/json").body(body);
            }

            telemetry::increment_requests();
            if is_refresh {
                telemetry::increment_refresh_calls();
            }

            let response = builder
                .send()
                .await
                .map_err(|e| transport_error(&endpoint, &e))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(&endpoint, &e))?;

            #[cfg(feature = "tracing")]
            tracing::debug!("{method} {endpoint} -> {status}");
            if status == placemap_core::transport::STATUS_UNAUTHORIZED {
                telemetry::increment_auth_failures();
            }
            Ok(Response::new(status, body))
        }
    }
}

fn transport_error(endpoint: &str, e: &reqwest::Error) -> Error {
    Error::Transport {
        context: format!("{endpoint}: {e}"),
    }
}
