//! Connection configuration.

use std::{fmt::Display, str::FromStr, time::Duration};

use snafu::prelude::*;
use url::Url;

use crate::{
    error::{
        EmptyCredential, EmptyEndpoint, EmptyIdentity, InvalidEndpoint, MissingEnvVar,
        UnknownEnvironment, UnsupportedScheme,
    },
    transport::TransportOptions,
    Error, Result,
};

static PRODUCTION_BASE: &str = "https://push.pushline.io";
static STAGING_BASE: &str = "https://push.staging.pushline.io";
static DEVELOPMENT_BASE: &str = "http://127.0.0.1:7777";

static DEFAULT_PATH: &str = "/push";

const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Named deployment environment
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Environment {
    /// production servers
    Production,
    /// staging servers
    Staging,
    /// local development server
    Development,
}

impl Environment {
    /// base endpoint of this environment
    pub fn base_address(&self) -> &'static str {
        match self {
            Self::Production => PRODUCTION_BASE,
            Self::Staging => STAGING_BASE,
            Self::Development => DEVELOPMENT_BASE,
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        };
        f.write_str(name)
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" | "dev" => Ok(Self::Development),
            _ => UnknownEnvironment { name: s }.fail(),
        }
    }
}

/// Where to connect, a named environment or an explicit base url
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// resolved by [`Environment::base_address`]
    Environment(Environment),
    /// explicit base url
    Url(String),
}

impl Endpoint {
    fn resolve(&self) -> Result<Url> {
        let s = match self {
            Self::Environment(env) => env.base_address(),
            Self::Url(s) => s.as_str(),
        };

        ensure!(!s.trim().is_empty(), EmptyEndpoint);

        let url = Url::parse(s).context(InvalidEndpoint { url: s })?;

        ensure!(
            matches!(url.scheme(), "http" | "https" | "ws" | "wss"),
            UnsupportedScheme {
                url: s,
                scheme: url.scheme(),
            }
        );

        Ok(url)
    }
}

impl From<Environment> for Endpoint {
    fn from(env: Environment) -> Self {
        Self::Environment(env)
    }
}

impl From<String> for Endpoint {
    fn from(s: String) -> Self {
        Self::Url(s)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Self::Url(s.to_string())
    }
}

/// Validated connection config.
///
/// A value of this type always has a parsed base address and non-empty
/// identity and credential, see [`Config::new`].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) base_address: Url,
    pub(crate) identity: String,
    pub(crate) credential: String,
    pub(crate) debug: bool,
    pub(crate) path: String,
    pub(crate) force_polling: bool,
    pub(crate) registration_timeout: Duration,
    pub(crate) reconnect_delay: Duration,
}

impl Config {
    /// Validate inputs and create a config with default options.
    ///
    /// Endpoint is checked first, then identity, then credential, each with
    /// its own error variant.
    pub fn new<E, I, C>(endpoint: E, identity: I, credential: C) -> Result<Self>
    where
        E: Into<Endpoint>,
        I: Into<String>,
        C: Into<String>,
    {
        let base_address = endpoint.into().resolve()?;

        let identity = identity.into();
        ensure!(!identity.is_empty(), EmptyIdentity);

        let credential = credential.into();
        ensure!(!credential.is_empty(), EmptyCredential);

        Ok(Self {
            base_address,
            identity,
            credential,
            debug: false,
            path: DEFAULT_PATH.to_string(),
            force_polling: false,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }

    /// Create config from environment variables.
    ///
    /// - `PUSHLINE_ENDPOINT`: explicit base url, or when absent
    /// - `PUSHLINE_ENVIRONMENT`: deployment environment name
    /// - `PUSHLINE_USER_ID`: user identity
    /// - `PUSHLINE_USER_TOKEN`: user credential
    /// - `PUSHLINE_DEBUG`: optional, `1` or `true` enables debug mode
    pub fn from_env() -> Result<Self> {
        let endpoint = match std::env::var("PUSHLINE_ENDPOINT") {
            Ok(url) => Endpoint::Url(url),
            Err(_) => Endpoint::Environment(env_var("PUSHLINE_ENVIRONMENT")?.parse()?),
        };

        let debug = std::env::var("PUSHLINE_DEBUG")
            .map(|v| matches!(v.as_str(), "1" | "true"))
            .unwrap_or(false);

        log::debug!("Loaded endpoint from environment: {:?}", endpoint);

        Ok(Self::new(
            endpoint,
            env_var("PUSHLINE_USER_ID")?,
            env_var("PUSHLINE_USER_TOKEN")?,
        )?
        .debug(debug))
    }

    /// Enable debug mode, transport errors and frames will be logged
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set request path used by transport
    pub fn path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = path.into();
        self
    }

    /// Prefer polling style transport instead of upgrading to raw socket
    pub fn force_polling(mut self, force: bool) -> Self {
        self.force_polling = force;
        self
    }

    /// Set how long to wait server registration acknowledgment after transport open
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// Set delay before reconnect after an abnormal close
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// base address
    pub fn base_address(&self) -> &Url {
        &self.base_address
    }

    /// user identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// is debug mode enabled
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// whether base address scheme indicates an encrypted connection
    pub fn is_secure(&self) -> bool {
        matches!(self.base_address.scheme(), "https" | "wss")
    }

    /// Options passed to transport at creation
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            base: self.base_address.clone(),
            path: self.path.clone(),
            log: self.debug,
            force_polling: self.force_polling,
            secure: self.is_secure(),
        }
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).context(MissingEnvVar { name })
}
