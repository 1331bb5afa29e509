//! Per-attempt state: rendezvous hostname, its address, and the connection stage.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, error};

use crate::error::{AppError, Result};

pub const TOKEN_BYTES: usize = 12;

pub fn generate_token(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::Token(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Looks up the rendezvous hostname.
pub trait HostResolver {
    fn resolve_ipv4(&self, host: &str) -> Result<Ipv4Addr>;
}

/// Resolver backed by the system's `getaddrinfo`. IPv6 results are ignored.
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve_ipv4(&self, host: &str) -> Result<Ipv4Addr> {
        let addrs = (host, 0).to_socket_addrs().map_err(|e| AppError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        addrs
            .filter_map(|a| match a.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| AppError::Resolve {
                host: host.to_string(),
                reason: "no IPv4 address".into(),
            })
    }
}

/// Progress of one tunnel attempt. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    TokenGenerated,
    HostResolved,
    ProbeSent,
    ChallengeParsed,
    AwaitingAssertion,
    AssertionReceived,
    TunnelLaunched,
    Running,
    Terminated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct Session {
    token: String,
    host: String,
    ip: Ipv4Addr,
    stage: Stage,
}

impl Session {
    /// Generates the token, derives `<token>.<service_host>`, and resolves it.
    pub fn establish(service_host: &str, resolver: &dyn HostResolver) -> Result<Self> {
        let token = generate_token(TOKEN_BYTES)?;
        let mut session = Self {
            host: format!("{}.{}", token, service_host),
            token,
            ip: Ipv4Addr::UNSPECIFIED,
            stage: Stage::Idle,
        };
        session.advance(Stage::TokenGenerated);
        session.ip = resolver.resolve_ipv4(&session.host)?;
        session.advance(Stage::HostResolved);
        Ok(session)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Moves to `next`. A move that is not forward is logged and refused.
    pub fn advance(&mut self, next: Stage) -> bool {
        if next <= self.stage {
            error!(from = %self.stage, to = %next, "refusing backwards session stage transition");
            return false;
        }
        debug!(from = %self.stage, to = %next, "session stage");
        self.stage = next;
        true
    }
}
