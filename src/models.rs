//! Domain models shared between the OpenVPN config parser, the probe parser and the orchestrator.

use std::path::PathBuf;

/// Connection parameters read from the user's `.ovpn` profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    /// Profile the OpenVPN binary is pointed at (the formatted copy when `formatted`).
    pub filename: PathBuf,
    pub protocol: String,
    pub port: u16,
    /// Endpoint hostname, e.g. `cvpn-endpoint-0123.prod.clientvpn.us-east-1.amazonaws.com`.
    pub host: String,
    /// True when directives were stripped and a copy was written.
    pub formatted: bool,
}

/// Login challenge emitted by the probe invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChallenge {
    pub url: String,
    pub session_id: String,
}
