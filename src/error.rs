use thiserror::Error;

pub const BUG_REPORT_URL: &str = "https://github.com/ajm113/unix-aws-vpn-client/issues";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("No awsvpnclient.yml found in the working directory or {0}")]
    ConfigNotFound(String),
    #[error("Bad config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid server listen address '{0}' (expected host:port)")]
    ListenAddr(String),
    #[error("OpenVPN config error: {0}")]
    Ovpn(String),
    #[error("Failed generating random token: {0}")]
    Token(String),
    #[error("Failed looking up IPv4 address of {host}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("No URLs found in payload from server")]
    NoUrlFound,
    #[error("More than one URL found in response payload: {0:?}")]
    MultipleUrlsFound(Vec<String>),
    #[error("Session ID (instance-...) not found in initial handshake")]
    SessionIdNotFound,
    #[error("Cannot bind SAML listener on {addr}: {reason}")]
    CallbackBind { addr: String, reason: String },
    #[error("SAML response channel closed before an assertion arrived")]
    HandoffClosed,
    #[error("No SAML response received within {0} seconds")]
    HandoffTimeout(u64),
    #[error("User lookup failed: {0}")]
    UserLookup(String),
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("Setup failed: {0}")]
    Setup(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
