//! crate error types

use snafu::prelude::*;

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error when construct a connection config.
///
/// Only construction can fail synchronously, everything happens after
/// [`Connection::start`](crate::Connection::start) is reported by connectivity
/// notifications instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Endpoint url is empty
    #[snafu(display("endpoint url is empty"))]
    EmptyEndpoint,

    /// Endpoint is not a valid url
    #[snafu(display("endpoint {url} is an invalid url: {source}"))]
    InvalidEndpoint {
        /// received url
        url: String,
        /// source error
        source: url::ParseError,
    },

    /// Endpoint url schema is not supported
    #[snafu(display(
        "endpoint {url} has invalid schema {scheme}, only http, https, ws or wss is ok"
    ))]
    UnsupportedScheme {
        /// received url
        url: String,
        /// invalid schema
        scheme: String,
    },

    /// User identity is empty
    #[snafu(display("user identity is empty"))]
    EmptyIdentity,

    /// User credential is empty
    #[snafu(display("user credential is empty"))]
    EmptyCredential,

    /// Deployment environment name can't be recognized
    #[snafu(display("unknown deployment environment {name}"))]
    UnknownEnvironment {
        /// received name
        name: String,
    },

    /// Required environment variable is missing or not unicode
    #[snafu(display("read environment variable {name} failed: {source}"))]
    MissingEnvVar {
        /// variable name
        name: String,
        /// source error
        source: std::env::VarError,
    },
}
