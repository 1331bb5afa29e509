//! Opening the SAML login URL in the invoking user's browser.
//!
//! The tool usually runs under sudo so the tunnel can configure a TUN device, but a browser
//! started as root either refuses to run or cannot reach the user's display. When privileged,
//! the opener is started with the original user's uid/gid and a rebuilt session environment.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{AppError, Result};
use crate::vpn::is_root;

/// The identity a browser should run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Variables copied from our environment so a graphical browser finds the session.
const SESSION_VARS: &[&str] = &[
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "XAUTHORITY",
    "DBUS_SESSION_BUS_ADDRESS",
];

/// The configured opener, or the platform's URL handler.
fn opener(configured: &str) -> Result<&str> {
    if !configured.is_empty() {
        Ok(configured)
    } else if cfg!(target_os = "macos") {
        Ok("open")
    } else if cfg!(target_os = "linux") {
        Ok("xdg-open")
    } else {
        Err(AppError::UnsupportedPlatform(std::env::consts::OS.to_string()))
    }
}

/// Picks the user name to act as: `SUDO_USER` first, then `default_user`.
pub fn acting_user_name<F>(get_var: F, default_user: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    get_var("SUDO_USER")
        .filter(|u| !u.is_empty())
        .or_else(|| Some(default_user.to_string()).filter(|u| !u.is_empty()))
        .ok_or_else(|| {
            AppError::UserLookup("SUDO_USER is not set and no vpn.user configured".into())
        })
}

/// Resolves the non-root identity from the environment and the passwd database.
#[cfg(unix)]
pub fn resolve_acting_user<F>(get_var: F, default_user: &str) -> Result<ActingUser>
where
    F: Fn(&str) -> Option<String>,
{
    let name = acting_user_name(get_var, default_user)?;
    let user = nix::unistd::User::from_name(&name)
        .map_err(|e| AppError::UserLookup(format!("{}: {}", name, e)))?
        .ok_or_else(|| AppError::UserLookup(format!("no such user '{}'", name)))?;
    Ok(ActingUser {
        name: user.name,
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        home: user.dir,
    })
}

/// Environment for a process started as `user`.
pub fn user_env<F>(user: &ActingUser, get_var: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = vec![
        ("HOME".to_string(), user.home.display().to_string()),
        ("USER".to_string(), user.name.clone()),
        ("LOGNAME".to_string(), user.name.clone()),
        ("XDG_RUNTIME_DIR".to_string(), format!("/run/user/{}", user.uid)),
    ];
    for var in SESSION_VARS {
        if let Some(value) = get_var(*var) {
            env.push((var.to_string(), value));
        }
    }
    env
}

/// Command that opens `url` as `user`.
#[cfg(unix)]
fn command_as_user<F>(program: &str, url: &str, user: &ActingUser, get_var: F) -> Command
where
    F: Fn(&str) -> Option<String>,
{
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new(program);
    cmd.arg(url).uid(user.uid).gid(user.gid).envs(user_env(user, get_var));
    cmd
}

#[cfg(unix)]
fn privileged_command(program: &str, url: &str, default_user: &str) -> Result<Command> {
    let get_var = |k: &str| std::env::var(k).ok();
    let user = resolve_acting_user(get_var, default_user)?;
    debug!(user = %user.name, uid = user.uid, "opening browser as non-root user");
    Ok(command_as_user(program, url, &user, get_var))
}

#[cfg(not(unix))]
fn privileged_command(_program: &str, _url: &str, _default_user: &str) -> Result<Command> {
    Err(AppError::UnsupportedPlatform(std::env::consts::OS.to_string()))
}

/// Opens `url` with `configured_opener` (or the default browser), dropping to the invoking
/// user when running as root.
pub fn open(url: &str, configured_opener: &str, default_user: &str) -> Result<()> {
    let program = opener(configured_opener)?;
    let mut cmd = if is_root() {
        privileged_command(program, url, default_user)?
    } else {
        let mut cmd = Command::new(program);
        cmd.arg(url);
        cmd
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_getter(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn alice() -> ActingUser {
        ActingUser { name: "alice".into(), uid: 1000, gid: 1000, home: "/home/alice".into() }
    }

    #[test]
    fn test_sudo_user_wins() {
        let name = acting_user_name(make_getter(&[("SUDO_USER", "bob")]), "alice").unwrap();
        assert_eq!(name, "bob");
    }

    #[test]
    fn test_default_user_fallback() {
        assert_eq!(acting_user_name(make_getter(&[]), "alice").unwrap(), "alice");
        assert_eq!(
            acting_user_name(make_getter(&[("SUDO_USER", "")]), "alice").unwrap(),
            "alice"
        );
    }

    #[test]
    fn test_no_identity_available() {
        assert!(matches!(
            acting_user_name(make_getter(&[]), ""),
            Err(AppError::UserLookup(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_root_from_passwd() {
        let user = resolve_acting_user(make_getter(&[("SUDO_USER", "root")]), "").unwrap();
        assert_eq!(user.uid, 0);
        assert_eq!(user.name, "root");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_unknown_user() {
        let err = resolve_acting_user(make_getter(&[]), "no-such-user-awsvpnclient").unwrap_err();
        assert!(matches!(err, AppError::UserLookup(_)));
    }

    #[test]
    fn test_user_env_rebuilds_session() {
        let env = user_env(
            &alice(),
            make_getter(&[("DISPLAY", ":0"), ("DBUS_SESSION_BUS_ADDRESS", "unix:path=/run/user/1000/bus")]),
        );
        let env: HashMap<_, _> = env.into_iter().collect();
        assert_eq!(env["HOME"], "/home/alice");
        assert_eq!(env["USER"], "alice");
        assert_eq!(env["LOGNAME"], "alice");
        assert_eq!(env["XDG_RUNTIME_DIR"], "/run/user/1000");
        assert_eq!(env["DISPLAY"], ":0");
        assert_eq!(env["DBUS_SESSION_BUS_ADDRESS"], "unix:path=/run/user/1000/bus");
        assert!(!env.contains_key("WAYLAND_DISPLAY"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_as_user() {
        let cmd = command_as_user("xdg-open", "https://idp.example.com/login", &alice(), make_getter(&[]));
        assert_eq!(cmd.get_program(), "xdg-open");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["https://idp.example.com/login"]);
        let home = cmd
            .get_envs()
            .find(|(k, _)| k.to_str() == Some("HOME"))
            .and_then(|(_, v)| v);
        assert_eq!(home, Some(std::ffi::OsStr::new("/home/alice")));
    }

    #[test]
    fn test_configured_opener_wins() {
        assert_eq!(opener("firefox").unwrap(), "firefox");
        #[cfg(target_os = "linux")]
        assert_eq!(opener("").unwrap(), "xdg-open");
        #[cfg(target_os = "macos")]
        assert_eq!(opener("").unwrap(), "open");
    }

    #[cfg(unix)]
    #[test]
    fn test_open_with_missing_opener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-opener");
        let result = open("https://idp.example.com/login", &missing.display().to_string(), "");
        assert!(result.is_err());
    }
}
