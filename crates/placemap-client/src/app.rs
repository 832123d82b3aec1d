//! Command execution.
//!
//! ## Responsibilities
//!
//! - Wire the HTTP transport, the session coordinator, the account and the
//!   viewport coordinator together.
//! - Run one command and write its output as JSON lines.
//! - In `watch` mode, feed stdin descriptors through the debounced path and
//!   force an immediate query when the login state changes.
//! - In `login` mode, relay the login window's messages from stdin to the
//!   handshake and sign in once it reports success.

use crate::{
    config::{ClientConfig, Command},
    telemetry,
    transport::HttpTransport,
};
use anyhow::Context;
use core::time::Duration;
use placemap_core::{
    Account, BoundingBox, Handshake, HandshakeMessage, HandshakeOutcome, MemoryCredentialStore,
    SessionCoordinator, SocialProvider, ViewportDescriptor, ViewportPhase,
    ViewportQueryCoordinator, VisibleResult, fetch_overview, viewport::VisibleReceiver,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// How often `watch` checks for outstanding queries after its input ends.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// A message from the login window, relayed as one JSON line.
#[derive(Deserialize)]
struct RelayedMessage {
    origin: String,
    #[serde(flatten)]
    message: HandshakeMessage,
}

pub struct App {
    session: SessionCoordinator<HttpTransport>,
    account: Account<HttpTransport>,
    viewport: ViewportQueryCoordinator<HttpTransport>,
    /// Origin the login window posts from: the API's own.
    origin: String,
    handshake_timeout: Duration,
}

impl App {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(
            config.api_base_url.clone(),
            config.session.refresh_endpoint.clone(),
            config.request_timeout,
        )?;
        let store = match &config.access_token {
            Some(credential) => MemoryCredentialStore::with_credential(credential.clone()),
            None => MemoryCredentialStore::new(),
        };
        let session = SessionCoordinator::new(transport, store, config.session.clone());
        let account = Account::new(session.clone());
        let viewport = ViewportQueryCoordinator::new(session.clone(), config.viewport.clone());
        Ok(Self {
            session,
            account,
            viewport,
            origin: config.api_base_url.origin().ascii_serialization(),
            handshake_timeout: config.handshake_timeout,
        })
    }

    pub fn session(&self) -> &SessionCoordinator<HttpTransport> {
        &self.session
    }

    pub fn viewport(&self) -> &ViewportQueryCoordinator<HttpTransport> {
        &self.viewport
    }

    /// Runs `command`, reading `watch` input from `input` and writing every
    /// result to `out`.
    pub async fn run<R, W>(&self, command: Command, input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match command {
            Command::Me => self.me(out).await,
            Command::Logout => self.logout(out).await,
            Command::Places {
                top_left,
                bottom_right,
                zoom,
                filter,
                user_location,
            } => {
                let bounds = BoundingBox {
                    top_left,
                    bottom_right,
                };
                let descriptor =
                    ViewportDescriptor::new(bounds, zoom, filter).with_user_location(user_location);
                self.places(descriptor, out).await
            }
            Command::Watch => self.watch(input, out).await,
            Command::Overview { id } => self.overview(id, out).await,
            Command::Login { provider } => self.login(provider, input, out).await,
        }
    }

    async fn me<W: AsyncWrite + Unpin>(&self, out: &mut W) -> anyhow::Result<()> {
        match self.account.check_me().await {
            Some(member) => write_json(out, &member).await,
            None => write_line(out, "not logged in").await,
        }
    }

    async fn logout<W: AsyncWrite + Unpin>(&self, out: &mut W) -> anyhow::Result<()> {
        self.account.logout().await;
        write_line(out, "logged out").await
    }

    async fn overview<W: AsyncWrite + Unpin>(&self, place_id: u64, out: &mut W) -> anyhow::Result<()> {
        let overview = fetch_overview(&self.session, place_id)
            .await
            .with_context(|| format!("failed to load the overview of place {place_id}"))?;
        write_json(out, &overview).await
    }

    async fn login<R, W>(&self, provider: SocialProvider, input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let url = self.session.transport().url(&provider.login_endpoint())?;
        write_line(out, url.as_str()).await?;

        let handshake = Handshake::new(self.origin.as_str());
        // Biased so the listener is registered before the first line is read.
        let outcome = tokio::select! {
            biased;
            outcome = self.account.complete_login(&handshake, self.handshake_timeout) => outcome,
            () = relay_handshake(input, &handshake) => HandshakeOutcome::Fail,
        };

        match (outcome, self.account.member()) {
            (HandshakeOutcome::Success, Some(member)) => write_json(out, &member).await,
            _ => write_line(out, "login failed").await,
        }
    }

    async fn places<W: AsyncWrite + Unpin>(
        &self,
        descriptor: ViewportDescriptor,
        out: &mut W,
    ) -> anyhow::Result<()> {
        let mut visible = self.viewport.subscribe();
        self.viewport.issue_query(descriptor);
        visible
            .changed()
            .await
            .context("viewport coordinator stopped before publishing")?;
        let result = visible.borrow_and_update().clone();
        if let Some(result) = result {
            emit(out, &result).await?;
        }
        Ok(())
    }

    async fn watch<R, W>(&self, input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut visible = self.viewport.subscribe();
        let mut login = self.account.login_state();
        let mut last: Option<ViewportDescriptor> = None;

        // The first login check runs alongside the input; when it lands, the
        // current viewport is queried again under the new login state.
        let account = self.account.clone();
        tokio::spawn(async move {
            account.check_me().await;
        });

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read viewport descriptors")? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ViewportDescriptor>(&line) {
                        Ok(descriptor) => {
                            last = Some(descriptor.clone());
                            self.viewport.on_viewport_changed(descriptor);
                        }
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Skipping invalid viewport descriptor: {_e}");
                        }
                    }
                }
                changed = visible.changed() => {
                    changed.context("viewport coordinator stopped")?;
                    emit_latest(&mut visible, out).await?;
                }
                changed = login.changed() => {
                    changed.context("account stopped")?;
                    let _signed_in = login.borrow_and_update().is_some();
                    #[cfg(feature = "tracing")]
                    tracing::info!("Login state changed (signed in: {_signed_in})");
                    if let Some(descriptor) = &last {
                        self.viewport.issue_query(descriptor.clone());
                    }
                }
            }
        }

        self.drain(&mut visible, out).await
    }

    /// Waits for the pending debounce and queries to settle, writing any
    /// result they publish.
    async fn drain<W: AsyncWrite + Unpin>(
        &self,
        visible: &mut VisibleReceiver,
        out: &mut W,
    ) -> anyhow::Result<()> {
        while self.viewport.phase() != ViewportPhase::Idle {
            tokio::select! {
                changed = visible.changed() => {
                    changed.context("viewport coordinator stopped")?;
                    emit_latest(visible, out).await?;
                }
                () = tokio::time::sleep(DRAIN_POLL) => {}
            }
        }
        if visible.has_changed().unwrap_or(false) {
            emit_latest(visible, out).await?;
        }
        Ok(())
    }
}

/// Posts every relayed message to `handshake`. Returns when the input ends
/// before any message was delivered; once one is, the waiter owns the
/// outcome and this never returns.
async fn relay_handshake<R: AsyncBufRead + Unpin>(input: R, handshake: &Handshake) {
    let mut lines = input.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<RelayedMessage>(&line) {
            Ok(relayed) => {
                if handshake.post(&relayed.origin, &relayed.message) > 0 {
                    return core::future::pending().await;
                }
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Skipping invalid login window message: {_e}");
            }
        }
    }
}

async fn emit_latest<W: AsyncWrite + Unpin>(
    visible: &mut VisibleReceiver,
    out: &mut W,
) -> anyhow::Result<()> {
    let result: Option<Arc<VisibleResult>> = visible.borrow_and_update().clone();
    match result {
        Some(result) => emit(out, &result).await,
        None => Ok(()),
    }
}

async fn emit<W: AsyncWrite + Unpin>(out: &mut W, result: &VisibleResult) -> anyhow::Result<()> {
    telemetry::increment_result_replacements();
    telemetry::record_places_per_result(result.places.len() as f64);
    #[cfg(feature = "tracing")]
    {
        if !result.is_complete() {
            tracing::warn!(
                "Generation {} is missing {:?}",
                result.generation,
                result.degraded
            );
        }
    }
    write_json(out, result).await
}

async fn write_json<W, T>(out: &mut W, value: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = serde_json::to_string(value).context("failed to encode output")?;
    write_line(out, &line).await
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> anyhow::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
