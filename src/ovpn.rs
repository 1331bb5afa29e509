//! `.ovpn` profile preparation.
//!
//! AWS-issued profiles carry directives the patched client must not see when driven
//! non-interactively (`auth-federate`, `auth-retry interact`) and a `remote` line we replace
//! with `--remote <ip> <port>` on the command line.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::ConnectionDescriptor;

const DEFAULT_PORT: u16 = 1194;
const DEFAULT_PROTO: &str = "udp";

/// Directives removed from the formatted profile.
const STRIPPED: &[&str] = &[
    "remote",
    "remote-random-hostname",
    "auth-federate",
    "auth-retry",
    "auth-user-pass",
];

struct Parsed {
    host: String,
    port: u16,
    protocol: String,
    kept: Vec<String>,
    removed: usize,
}

fn directive(line: &str) -> Option<&str> {
    let l = line.trim();
    if l.is_empty() || l.starts_with('#') || l.starts_with(';') {
        return None;
    }
    l.split_whitespace().next()
}

fn parse(content: &str) -> Result<Parsed> {
    let mut remote: Option<(String, u16)> = None;
    let mut protocol: Option<String> = None;
    let mut kept = Vec::new();
    let mut removed = 0;
    let mut inline_block: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(tag) = &inline_block {
            if trimmed == format!("</{}>", tag) {
                inline_block = None;
            }
            kept.push(line.to_string());
            continue;
        }
        if let Some(tag) = trimmed.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            if !tag.starts_with('/') {
                inline_block = Some(tag.to_string());
            }
            kept.push(line.to_string());
            continue;
        }

        let Some(name) = directive(line) else {
            kept.push(line.to_string());
            continue;
        };
        let args: Vec<&str> = trimmed.split_whitespace().skip(1).collect();

        match name {
            "remote" if remote.is_none() => {
                let host = args
                    .first()
                    .ok_or_else(|| AppError::Ovpn("'remote' without a host".into()))?;
                let port = match args.get(1) {
                    Some(p) => p
                        .parse()
                        .map_err(|_| AppError::Ovpn(format!("invalid remote port '{}'", p)))?,
                    None => DEFAULT_PORT,
                };
                if let Some(proto) = args.get(2) {
                    protocol.get_or_insert_with(|| proto.to_string());
                }
                remote = Some((host.to_string(), port));
            }
            "proto" => {
                if let Some(p) = args.first() {
                    protocol = Some(p.to_string());
                }
            }
            _ => {}
        }

        if STRIPPED.contains(&name) {
            removed += 1;
        } else {
            kept.push(line.to_string());
        }
    }

    let (host, port) = remote.ok_or_else(|| AppError::Ovpn("no 'remote' directive".into()))?;
    Ok(Parsed {
        host,
        port,
        protocol: protocol.unwrap_or_else(|| DEFAULT_PROTO.to_string()),
        kept,
        removed,
    })
}

fn formatted_path(raw: &Path, out_dir: &Path) -> PathBuf {
    let stem = raw
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "client".into());
    out_dir.join(format!("{}.formatted.ovpn", stem))
}

/// Reads `raw_path` and writes the stripped copy the client is run against into `out_dir`.
pub fn parse_and_format(raw_path: &Path, out_dir: &Path) -> Result<ConnectionDescriptor> {
    let content = std::fs::read_to_string(raw_path)
        .map_err(|e| AppError::Ovpn(format!("Cannot read {}: {}", raw_path.display(), e)))?;
    let parsed = parse(&content)?;

    std::fs::create_dir_all(out_dir)?;
    let filename = formatted_path(raw_path, out_dir);
    let mut body = parsed.kept.join("\n");
    body.push('\n');
    std::fs::write(&filename, body)?;
    debug!(removed = parsed.removed, path = %filename.display(), "wrote formatted openvpn config");

    Ok(ConnectionDescriptor {
        filename,
        protocol: parsed.protocol,
        port: parsed.port,
        host: parsed.host,
        formatted: parsed.removed > 0,
    })
}
