use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use core::time::Duration;
use placemap_core::{
    Coordinate, Credential, PlaceFilter, SessionConfig, SocialProvider, ViewportConfig,
    session::DEFAULT_REFRESH_ENDPOINT,
};
use reqwest::Url;

/// Runtime configuration for the `placemap` binary.
///
/// Every option can also be supplied through the environment (or a `.env`
/// file). Timeouts and the debounce window are validated to be non-zero.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "placemap",
    version,
    about = "Query the placemap API with transparent session refresh"
)]
pub struct CliArgs {
    /// Base URL every endpoint path is resolved against.
    ///
    /// Environment variable: `API_BASE_URL`
    #[arg(long, env = "API_BASE_URL", default_value_t = String::from("http://localhost:8080/api"))]
    pub api_base_url: String,

    /// Endpoint that exchanges the session cookie for a new access token.
    ///
    /// Environment variable: `REFRESH_ENDPOINT`
    #[arg(long, env = "REFRESH_ENDPOINT", default_value_t = String::from(DEFAULT_REFRESH_ENDPOINT))]
    pub refresh_endpoint: String,

    /// Upper bound on a single refresh, in milliseconds. Hitting it counts as
    /// a failed refresh.
    ///
    /// Environment variable: `REFRESH_TIMEOUT_MS`
    #[arg(long, env = "REFRESH_TIMEOUT_MS", default_value_t = 10_000)]
    pub refresh_timeout_ms: u64,

    /// Per-request timeout of the HTTP client, in milliseconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 15_000)]
    pub request_timeout_ms: u64,

    /// Quiet period before a burst of viewport changes becomes a query, in
    /// milliseconds.
    ///
    /// Environment variable: `DEBOUNCE_MS`
    #[arg(long, env = "DEBOUNCE_MS", default_value_t = 250)]
    pub debounce_ms: u64,

    /// Abort superseded viewport queries instead of discarding their results.
    ///
    /// Environment variable: `CANCEL_IN_FLIGHT`
    #[arg(long, env = "CANCEL_IN_FLIGHT", default_value_t = false)]
    pub cancel_in_flight: bool,

    /// How long `login` waits for the login window to report back, in
    /// milliseconds.
    ///
    /// Environment variable: `HANDSHAKE_TIMEOUT_MS`
    #[arg(long, env = "HANDSHAKE_TIMEOUT_MS", default_value_t = 120_000)]
    pub handshake_timeout_ms: u64,

    /// Access token to start the session with.
    ///
    /// Environment variable: `ACCESS_TOKEN`
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the signed-in member.
    Me,
    /// Log out and forget the access token.
    Logout,
    /// Query the places inside a rectangle once and print the result.
    Places {
        /// North-west corner as `LAT,LNG`.
        #[arg(long, allow_hyphen_values = true)]
        top_left: Coordinate,
        /// South-east corner as `LAT,LNG`.
        #[arg(long, allow_hyphen_values = true)]
        bottom_right: Coordinate,
        #[arg(long)]
        zoom: u8,
        /// `official`, `member` or `both`.
        #[arg(long, default_value = "official")]
        filter: PlaceFilter,
        /// The user's location as `LAT,LNG`; defaults to the rectangle centre.
        #[arg(long, allow_hyphen_values = true)]
        user_location: Option<Coordinate>,
    },
    /// Read viewport descriptors (one JSON object per line) from stdin and
    /// print every visible-result replacement.
    Watch,
    /// Print the outline of an official place and the frame to show it in.
    Overview {
        /// Official place id.
        #[arg(long)]
        id: u64,
    },
    /// Print the provider's login page, then wait for the login window's
    /// message on stdin (`{"origin": ..., "type": "oauth:success"}`).
    Login {
        /// `kakao` or `naver`.
        #[arg(long)]
        provider: SocialProvider,
    },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub session: SessionConfig,
    pub viewport: ViewportConfig,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Seeds the credential store; redacted in `Debug` output.
    pub access_token: Option<Credential>,
    pub command: Command,
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let api_base_url = Url::parse(&args.api_base_url)
            .with_context(|| format!("API_BASE_URL `{}` is not a valid URL", args.api_base_url))?;
        if !matches!(api_base_url.scheme(), "http" | "https") {
            bail!(
                "API_BASE_URL must use http or https, got `{}`",
                api_base_url.scheme()
            );
        }

        if !args.refresh_endpoint.starts_with('/') {
            bail!(
                "REFRESH_ENDPOINT must be a path starting with `/`, got `{}`",
                args.refresh_endpoint
            );
        }

        for (name, value) in [
            ("REFRESH_TIMEOUT_MS", args.refresh_timeout_ms),
            ("REQUEST_TIMEOUT_MS", args.request_timeout_ms),
            ("DEBOUNCE_MS", args.debounce_ms),
            ("HANDSHAKE_TIMEOUT_MS", args.handshake_timeout_ms),
        ] {
            if value == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        Ok(Self {
            api_base_url,
            session: SessionConfig {
                refresh_endpoint: args.refresh_endpoint,
                refresh_timeout: Duration::from_millis(args.refresh_timeout_ms),
            },
            viewport: ViewportConfig {
                debounce: Duration::from_millis(args.debounce_ms),
                cancel_in_flight: args.cancel_in_flight,
            },
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
            access_token: args
                .access_token
                .filter(|token| !token.is_empty())
                .map(Credential::new),
            command: args.command,
        })
    }
}
