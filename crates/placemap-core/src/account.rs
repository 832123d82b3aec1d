//! The signed-in member and the login/logout flows around it.
//!
//! [`Account`] never touches the credential on its own; it goes through the
//! [`SessionCoordinator`] for refreshes, replays and logout.

use crate::{
    credential::{CredentialStore, MemoryCredentialStore},
    envelope::decode_data,
    error::Result,
    handshake::{Handshake, HandshakeOutcome},
    session::SessionCoordinator,
    transport::{Request, Transport},
};
use core::{str::FromStr, time::Duration};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

pub const ME_ENDPOINT: &str = "/web/auth/me";
pub const LOGOUT_ENDPOINT: &str = "/web/oauth2/logout";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SocialProvider {
    Kakao,
    Naver,
}

impl SocialProvider {
    /// Page the login window opens to start the provider's OAuth flow.
    pub fn login_endpoint(self) -> String {
        let provider = match self {
            SocialProvider::Kakao => "kakao",
            SocialProvider::Naver => "naver",
        };
        format!("/web/oauth2/login/{provider}")
    }
}

impl FromStr for SocialProvider {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kakao" => Ok(SocialProvider::Kakao),
            "naver" => Ok(SocialProvider::Naver),
            other => Err(format!("unknown provider `{other}` (kakao, naver)")),
        }
    }
}

/// Profile of the signed-in member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub name: String,
    pub profile: String,
    pub email: String,
    pub social_provider: SocialProvider,
    #[serde(default)]
    pub vote_cnt: u64,
    #[serde(default)]
    pub question_cnt: u64,
}

/// Receiver of login-state changes: `Some` while a member is signed in.
pub type LoginState = watch::Receiver<Option<Member>>;

pub struct Account<T, S = MemoryCredentialStore> {
    session: SessionCoordinator<T, S>,
    member: Arc<watch::Sender<Option<Member>>>,
}

impl<T, S> Clone for Account<T, S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            member: Arc::clone(&self.member),
        }
    }
}

impl<T, S> Account<T, S>
where
    T: Transport,
    S: CredentialStore + 'static,
{
    pub fn new(session: SessionCoordinator<T, S>) -> Self {
        let (member, _) = watch::channel(None);
        Self {
            session,
            member: Arc::new(member),
        }
    }

    /// Fetches the signed-in member. Any failure means "not logged in".
    pub async fn check_me(&self) -> Option<Member> {
        let member = match self.fetch_me().await {
            Ok(member) => Some(member),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Not logged in: {_e}");
                None
            }
        };
        self.publish(member.clone());
        member
    }

    /// Refreshes the credential first, then fetches the member.
    ///
    /// Used right after an external login, when the server has only set the
    /// session marker and no credential exists yet.
    pub async fn reissue_and_check_me(&self) -> Option<Member> {
        if let Err(_e) = self.session.refresh().await {
            #[cfg(feature = "tracing")]
            tracing::info!("Reissue after login failed: {_e}");
            self.publish(None);
            return None;
        }
        self.check_me().await
    }

    /// Waits for the login window to report back, then signs in on success.
    pub async fn complete_login(&self, handshake: &Handshake, timeout: Duration) -> HandshakeOutcome {
        let outcome = handshake.wait(timeout).await;
        if outcome == HandshakeOutcome::Success {
            self.reissue_and_check_me().await;
        }
        outcome
    }

    /// Logs out on the server, ignoring failures; the local credential and
    /// member are cleared either way.
    pub async fn logout(&self) {
        if let Err(_e) = self.session.call(Request::post(LOGOUT_ENDPOINT)).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ignoring logout failure: {_e}");
        }
        self.session.clear_credential();
        self.publish(None);
    }

    pub fn member(&self) -> Option<Member> {
        self.member.borrow().clone()
    }

    pub fn is_authed(&self) -> bool {
        self.member.borrow().is_some()
    }

    pub fn login_state(&self) -> LoginState {
        self.member.subscribe()
    }

    pub fn session(&self) -> &SessionCoordinator<T, S> {
        &self.session
    }

    async fn fetch_me(&self) -> Result<Member> {
        let response = self.session.call(Request::get(ME_ENDPOINT)).await?;
        decode_data(ME_ENDPOINT, &response.body)
    }

    /// Notifies subscribers only when the member actually changed.
    fn publish(&self, member: Option<Member>) {
        self.member.send_if_modified(|current| {
            if *current == member {
                return false;
            }
            *current = member;
            true
        });
    }
}
