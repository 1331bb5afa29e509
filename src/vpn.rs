//! VPN connection via AWS Client VPN with SAML authentication.
//!
//! Flow: random hostname → probe openvpn (ACS) → SAML URL + session id → browser login →
//! SAML callback → tunnel openvpn (CRV1).

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser;
use crate::callback::AssertionReceiver;
use crate::challenge;
use crate::config::AppConfig;
use crate::credential::{Credential, CredentialFile};
use crate::error::Result;
use crate::models::ConnectionDescriptor;
use crate::session::{HostResolver, Session, Stage, SystemResolver};

const VERBOSITY: &str = "3";

/// `$0` for the shell wrapper. The script runs its positional arguments verbatim.
const SHELL_ARGV0: &str = "awsvpnclient";
const SHELL_SCRIPT: &str = r#"exec "$@""#;

pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::Uid::effective().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Exits after the server answers with the SAML challenge.
    Probe,
    /// Holds the tunnel open.
    Tunnel,
}

/// A program and its argument vector, never joined into a shell string.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

pub fn openvpn_invocation(
    openvpn: &str,
    connection: &ConnectionDescriptor,
    remote_ip: &str,
    auth_file: &Path,
    mode: Mode,
) -> Invocation {
    let mut args: Vec<OsString> = vec![
        "--verb".into(),
        VERBOSITY.into(),
        "--config".into(),
        connection.filename.clone().into(),
        "--proto".into(),
        connection.protocol.clone().into(),
        "--remote".into(),
        remote_ip.into(),
        connection.port.to_string().into(),
    ];
    if mode == Mode::Tunnel {
        args.extend(["--script-security".into(), "2".into()]);
    }
    args.extend(["--auth-user-pass".into(), auth_file.into()]);
    Invocation { program: openvpn.into(), args }
}

/// Runs `inner` as `<shell> <shell_args..> 'exec "$@"' argv0 <sudo..> <program> <args..>`.
///
/// The shell only ever sees the fixed script; every argument reaches `exec` as a positional
/// parameter, so no quoting is involved.
pub fn wrap_in_shell(shell: &str, shell_args: &[String], sudo: &[String], inner: Invocation) -> Invocation {
    let mut args: Vec<OsString> = shell_args.iter().map(OsString::from).collect();
    args.push(SHELL_SCRIPT.into());
    args.push(SHELL_ARGV0.into());
    args.extend(sudo.iter().map(OsString::from));
    args.push(inner.program);
    args.extend(inner.args);
    Invocation { program: shell.into(), args }
}

/// Picks direct or shell-wrapped execution for the tunnel.
pub fn tunnel_invocation(config: &AppConfig, inner: Invocation, privileged: bool) -> Invocation {
    if config.vpn.shell.is_empty() || privileged {
        inner
    } else {
        wrap_in_shell(&config.vpn.shell, &config.vpn.shell_args, &config.sudo_argv(), inner)
    }
}

pub struct TunnelOrchestrator {
    config: AppConfig,
    connection: ConnectionDescriptor,
    temp_dir: PathBuf,
    assertions: AssertionReceiver,
    assertion_timeout: Option<Duration>,
    resolver: Box<dyn HostResolver + Send>,
}

impl TunnelOrchestrator {
    pub fn new(
        config: AppConfig,
        connection: ConnectionDescriptor,
        temp_dir: PathBuf,
        assertions: AssertionReceiver,
    ) -> Self {
        Self {
            config,
            connection,
            temp_dir,
            assertions,
            assertion_timeout: None,
            resolver: Box::new(SystemResolver),
        }
    }

    /// Bounds the wait for the SAML response. `None` (the default) waits forever.
    pub fn with_assertion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.assertion_timeout = timeout;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn HostResolver + Send>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Full connection flow. Returns once the tunnel process exits.
    pub fn run(self) -> Result<ExitStatus> {
        let mut session = Session::establish(&self.connection.host, self.resolver.as_ref())?;
        let remote_ip = session.ip().to_string();
        debug!(
            token = session.token(),
            host = %session.host(),
            remote = %remote_ip,
            "resolved rendezvous hostname"
        );

        let port = self.config.callback_port()?;
        let probe_auth = CredentialFile::create(&self.temp_dir, &Credential::Acs { port })?;

        info!(
            config = %self.connection.filename.display(),
            remote = %remote_ip,
            "Fetching redirect URL from service..."
        );
        let probe = openvpn_invocation(
            &self.config.vpn.openvpn,
            &self.connection,
            &remote_ip,
            probe_auth.path(),
            Mode::Probe,
        );
        let output = probe.command().output();
        probe_auth.remove();
        let output = output?;
        session.advance(Stage::ProbeSent);

        let mut payload = String::from_utf8_lossy(&output.stdout).into_owned();
        payload.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!(command = %probe, status = %output.status, payload = %payload, "Executed command");

        let auth = challenge::extract(&payload)?;
        session.advance(Stage::ChallengeParsed);

        info!("open to authenticate into OpenVPN tunnel: {}", auth.url);
        if self.config.browser {
            if let Err(e) = browser::open(&auth.url, &self.config.opener, &self.config.vpn.user) {
                warn!(error = %e, "Failed opening default browser. Please use the provided link in the output");
            }
        }

        session.advance(Stage::AwaitingAssertion);
        info!("Waiting for SAML response from 3rd party service...");
        let assertion = self.assertions.wait(self.assertion_timeout)?;
        session.advance(Stage::AssertionReceived);
        info!("Received SAML response! Attempting to start OpenVPN client tunnel...");

        let tunnel_auth = CredentialFile::create(
            &self.temp_dir,
            &Credential::Crv1 { session_id: auth.session_id, assertion },
        )?;
        let direct = openvpn_invocation(
            &self.config.vpn.openvpn,
            &self.connection,
            &remote_ip,
            tunnel_auth.path(),
            Mode::Tunnel,
        );
        let tunnel = tunnel_invocation(&self.config, direct, is_root());
        debug!(command = %tunnel, "Executing OpenVPN tunnel");

        session.advance(Stage::TunnelLaunched);
        let status = match tunnel.command().spawn() {
            Ok(mut child) => {
                session.advance(Stage::Running);
                child.wait()
            }
            Err(e) => Err(e),
        };
        tunnel_auth.remove();
        let status = status?;

        session.advance(Stage::Terminated);
        info!(%status, stage = %session.stage(), "OpenVPN tunnel exited");
        Ok(status)
    }
}
