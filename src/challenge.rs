//! Parsing of the probe invocation's output.
//!
//! The patched OpenVPN client fails the first connection with a control message like
//! `AUTH_FAILED,CRV1:R:instance-1/52913/b5b1a:b'Ti9B':https://portal.sso...`, carrying the
//! session id and the IdP login URL we hand to the user.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::AuthChallenge;

pub const SESSION_ID_PREFIX: &str = "instance-";

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhttps?://[^\s'"<>]+"#).expect("static URL regex is valid")
    })
}

/// Returns the single URL in `output`. Zero or several matches are both errors.
pub fn extract_url(output: &str) -> Result<String> {
    let mut urls: Vec<String> = url_regex()
        .find_iter(output)
        .map(|m| m.as_str().to_string())
        .collect();
    match urls.len() {
        0 => Err(AppError::NoUrlFound),
        1 => Ok(urls.remove(0)),
        _ => Err(AppError::MultipleUrlsFound(urls)),
    }
}

/// Returns the first `instance-` token, splitting on colons and whitespace.
pub fn extract_session_id(output: &str) -> Result<String> {
    output
        .split(|c: char| c == ':' || c.is_whitespace())
        .find(|t| t.starts_with(SESSION_ID_PREFIX))
        .map(str::to_string)
        .ok_or(AppError::SessionIdNotFound)
}

pub fn extract(output: &str) -> Result<AuthChallenge> {
    let url = extract_url(output)?;
    let session_id = extract_session_id(output)?;
    Ok(AuthChallenge { url, session_id })
}
