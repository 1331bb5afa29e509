//! Transient `--auth-user-pass` files for the two OpenVPN invocations.

use std::fmt;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;

/// Username line. The patched client ignores it and only reads the password line, but
/// OpenVPN rejects an auth file whose first line is empty, so a placeholder is written.
const USERNAME_PLACEHOLDER: &str = "N/A";

/// Password line written to the credential file.
#[derive(Clone, PartialEq)]
pub enum Credential {
    /// Probe phase: tells the endpoint where the SAML callback listens.
    Acs { port: u16 },
    /// Tunnel phase: challenge response carrying the SAML assertion.
    Crv1 { session_id: String, assertion: String },
}

impl Credential {
    pub fn password(&self) -> String {
        match self {
            Self::Acs { port } => format!("ACS::{}", port),
            Self::Crv1 { session_id, assertion } => {
                format!("CRV1::{}::{}", session_id, query_escape(assertion))
            }
        }
    }
}

// The assertion is a bearer credential; keep it out of debug logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acs { port } => f.debug_struct("Acs").field("port", port).finish(),
            Self::Crv1 { session_id, assertion } => f
                .debug_struct("Crv1")
                .field("session_id", session_id)
                .field("assertion_len", &assertion.len())
                .finish(),
        }
    }
}

/// Form-style escaping (space becomes `+`), as a query string value.
pub fn query_escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Credential file on disk for the lifetime of one invocation.
///
/// Removed by [`CredentialFile::remove`] once the invocation is done, or on drop if an
/// error path skips that call.
pub struct CredentialFile {
    file: NamedTempFile,
}

impl CredentialFile {
    pub fn create(dir: &Path, credential: &Credential) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("openvpn-auth-")
            .suffix(".conf")
            .tempfile_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }
        write!(file, "{}\n{}\n", USERNAME_PLACEHOLDER, credential.password())?;
        file.flush()?;
        debug!(path = %file.path().display(), credential = ?credential, "wrote openvpn auth file");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Deletes the file. Failure is logged, never returned.
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!(path = %path.display(), error = %e, "Failed deleting tmp openvpn auth config");
        }
    }
}
