//! Static pages returned to the browser after the IdP posts back.

use tiny_http::{Header, Response, StatusCode};

const SUCCESS_HTML: &str = include_str!("../html/index.html");
const ERROR_HTML: &str = include_str!("../html/error.html");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Success,
    Error,
}

impl Page {
    pub fn html(self) -> &'static str {
        match self {
            Self::Success => SUCCESS_HTML,
            Self::Error => ERROR_HTML,
        }
    }

    pub fn into_response(self, status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
        let mut response = Response::from_string(self.html()).with_status_code(StatusCode(status));
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
            response.add_header(header);
        }
        response
    }
}
