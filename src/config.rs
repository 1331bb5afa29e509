//! Application configuration (`awsvpnclient.yml`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, Result};

pub const CONFIG_FILENAME: &str = "awsvpnclient.yml";
const CONFIG_DIRNAME: &str = "awsvpnclient";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    /// Open the SAML login URL in the user's browser.
    pub browser: bool,
    /// Program that opens the login URL. Empty picks `xdg-open` or `open`.
    pub opener: String,
    pub vpn: VpnSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VpnSection {
    /// Path to the patched OpenVPN binary.
    pub openvpn: String,
    /// Privilege escalation prefix, e.g. `sudo` or `sudo -E`.
    pub sudo: String,
    /// Shell used to re-invoke the tunnel with elevated privileges. Empty means direct.
    pub shell: String,
    /// Flags placed before the command string, ending in `-c` or equivalent.
    #[serde(alias = "shellargs")]
    pub shell_args: Vec<String>,
    /// Fallback identity for the browser when `SUDO_USER` is not set.
    pub user: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            browser: true,
            opener: String::new(),
            vpn: VpnSection::default(),
            server: ServerSection::default(),
        }
    }
}

impl Default for VpnSection {
    fn default() -> Self {
        Self {
            openvpn: "openvpn".into(),
            sudo: "sudo".into(),
            shell: String::new(),
            shell_args: Vec::new(),
            user: String::new(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { addr: "127.0.0.1:35001".into() }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|source| AppError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects combinations that only fail later, at tunnel launch.
    pub fn validate(&self) -> Result<()> {
        if !self.vpn.shell.is_empty() && self.vpn.shell_args.is_empty() {
            return Err(AppError::InvalidConfig(format!(
                "vpn.shell is '{}' but vpn.shell_args is empty; the shell needs a command-string flag such as -c",
                self.vpn.shell
            )));
        }
        Ok(())
    }

    fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty file deserializes to unit, not to a mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Port the SAML callback server listens on, taken from `server.addr`.
    pub fn callback_port(&self) -> Result<u16> {
        parse_port(&self.server.addr)
    }

    /// Address handed to the HTTP listener. A Go-style `:port` binds every interface.
    pub fn listen_addr(&self) -> String {
        match self.server.addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.server.addr.clone(),
        }
    }

    /// Privilege escalation command as an argument vector.
    pub fn sudo_argv(&self) -> Vec<String> {
        self.vpn.sudo.split_whitespace().map(str::to_string).collect()
    }
}

fn parse_port(addr: &str) -> Result<u16> {
    let (_, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| AppError::ListenAddr(addr.to_string()))?;
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| AppError::ListenAddr(addr.to_string()))
}

/// Locations checked after the working directory, in order.
///
/// `~/.config` is searched even where the platform config dir lives elsewhere (macOS).
fn user_config_paths(config_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let dirs = [config_dir, home_dir.map(|h| h.join(".config"))];
    for dir in dirs.into_iter().flatten() {
        let path = dir.join(CONFIG_DIRNAME).join(CONFIG_FILENAME);
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Finds the config file: working directory first, then the user config directories.
pub fn search_config_file() -> Result<PathBuf> {
    let at_cwd = std::env::current_dir()?.join(CONFIG_FILENAME);
    if at_cwd.is_file() {
        return Ok(at_cwd);
    }
    let candidates = user_config_paths(dirs::config_dir(), dirs::home_dir());
    if let Some(path) = candidates.iter().find(|p| p.is_file()) {
        return Ok(path.clone());
    }
    let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    Err(AppError::ConfigNotFound(if searched.is_empty() {
        format!("~/.config/{}/{}", CONFIG_DIRNAME, CONFIG_FILENAME)
    } else {
        searched.join(" or ")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let yaml = r#"
debug: true
browser: false
opener: firefox
vpn:
  openvpn: /usr/local/bin/openvpn_aws
  sudo: sudo -E
  shell: /bin/bash
  shell_args: ["-c"]
  user: alice
server:
  addr: "127.0.0.1:35002"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(config.debug);
        assert!(!config.browser);
        assert_eq!(config.opener, "firefox");
        assert_eq!(config.vpn.openvpn, "/usr/local/bin/openvpn_aws");
        assert_eq!(config.sudo_argv(), vec!["sudo", "-E"]);
        assert_eq!(config.vpn.shell, "/bin/bash");
        assert_eq!(config.vpn.shell_args, vec!["-c"]);
        assert_eq!(config.vpn.user, "alice");
        assert_eq!(config.callback_port().unwrap(), 35002);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = AppConfig::from_yaml("vpn:\n  openvpn: ./openvpn_aws\n").unwrap();
        assert!(!config.debug);
        assert!(config.browser);
        assert!(config.opener.is_empty());
        assert_eq!(config.vpn.openvpn, "./openvpn_aws");
        assert_eq!(config.vpn.sudo, "sudo");
        assert!(config.vpn.shell.is_empty());
        assert_eq!(config.server.addr, "127.0.0.1:35001");

        let empty = AppConfig::from_yaml("").unwrap();
        assert_eq!(empty.callback_port().unwrap(), 35001);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(AppConfig::from_yaml("vpn: [unterminated").is_err());
    }

    #[test]
    fn test_callback_port_forms() {
        assert_eq!(parse_port("127.0.0.1:35001").unwrap(), 35001);
        assert_eq!(parse_port(":35001").unwrap(), 35001);
        assert_eq!(parse_port("[::1]:8080").unwrap(), 8080);
        assert!(matches!(parse_port("localhost"), Err(AppError::ListenAddr(_))));
        assert!(matches!(parse_port("localhost:http"), Err(AppError::ListenAddr(_))));
        assert!(matches!(parse_port("localhost:0"), Err(AppError::ListenAddr(_))));
    }

    #[test]
    fn test_listen_addr_go_style() {
        let mut config = AppConfig::default();
        config.server.addr = ":35001".into();
        assert_eq!(config.listen_addr(), "0.0.0.0:35001");
        config.server.addr = "127.0.0.1:1234".into();
        assert_eq!(config.listen_addr(), "127.0.0.1:1234");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "browser: false\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert!(!config.browser);

        std::fs::write(&path, "browser: [1, 2").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(AppError::ConfigParse { .. })));
    }

    #[test]
    fn test_go_style_shellargs_key() {
        let config = AppConfig::from_yaml("vpn:\n  shell: /bin/bash\n  shellargs: [\"-i\", \"-c\"]\n").unwrap();
        assert_eq!(config.vpn.shell, "/bin/bash");
        assert_eq!(config.vpn.shell_args, vec!["-i", "-c"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shell_without_args_is_rejected() {
        let config = AppConfig::from_yaml("vpn:\n  shell: /bin/bash\n").unwrap();
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));
        assert!(AppConfig::default().validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "vpn:\n  shell: /bin/bash\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_user_config_paths_include_dot_config() {
        let paths = user_config_paths(
            Some(PathBuf::from("/Users/alice/Library/Application Support")),
            Some(PathBuf::from("/Users/alice")),
        );
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/Users/alice/Library/Application Support/awsvpnclient/awsvpnclient.yml"),
                PathBuf::from("/Users/alice/.config/awsvpnclient/awsvpnclient.yml"),
            ]
        );

        let linux = user_config_paths(Some(PathBuf::from("/home/bob/.config")), Some(PathBuf::from("/home/bob")));
        assert_eq!(linux, vec![PathBuf::from("/home/bob/.config/awsvpnclient/awsvpnclient.yml")]);
        assert!(user_config_paths(None, None).is_empty());
    }
}
