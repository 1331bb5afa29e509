//! SAML callback endpoint.
//!
//! The IdP's login page finishes with an auto-submitted form that POSTs `SAMLResponse` to
//! `http://127.0.0.1:<port>/`. The first valid assertion is handed to the orchestrator through
//! a zero-capacity channel: the handler blocks until the orchestrator takes it.

use std::io::Read as _;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use tiny_http::{Method, Request, Server};
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::pages::Page;

pub const ASSERTION_FIELD: &str = "SAMLResponse";

/// Why a callback request did not deliver an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MethodNotAllowed(String),
    MissingAssertion,
    AlreadyDelivered,
    ReceiverGone,
}

impl Rejection {
    pub fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed(_) => 405,
            Self::MissingAssertion | Self::AlreadyDelivered => 400,
            Self::ReceiverGone => 500,
        }
    }
}

/// Receiving half of the handoff, owned by the orchestrator.
pub struct AssertionReceiver {
    rx: Receiver<String>,
}

impl AssertionReceiver {
    /// Blocks until an assertion arrives. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<String> {
        match timeout {
            None => self.rx.recv().map_err(|_| AppError::HandoffClosed),
            Some(t) => self.rx.recv_timeout(t).map_err(|e| match e {
                RecvTimeoutError::Timeout => AppError::HandoffTimeout(t.as_secs()),
                RecvTimeoutError::Disconnected => AppError::HandoffClosed,
            }),
        }
    }
}

/// Sending half plus the one-shot bookkeeping, owned by the HTTP thread.
pub struct AssertionSender {
    tx: SyncSender<String>,
    delivered: bool,
}

pub fn handoff() -> (AssertionSender, AssertionReceiver) {
    let (tx, rx) = mpsc::sync_channel(0);
    (AssertionSender { tx, delivered: false }, AssertionReceiver { rx })
}

/// Pulls the assertion out of a form body, falling back to the query string.
fn extract_assertion(body: &str, url: &str) -> Option<String> {
    let from_body = url::form_urlencoded::parse(body.as_bytes())
        .find(|(key, _)| key == ASSERTION_FIELD)
        .map(|(_, val)| val.into_owned());
    from_body
        .or_else(|| {
            let query = url.split_once('?').map(|(_, q)| q)?;
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == ASSERTION_FIELD)
                .map(|(_, val)| val.into_owned())
        })
        .filter(|v| !v.is_empty())
}

impl AssertionSender {
    /// Validates one request and, if it carries the first assertion, delivers it.
    pub fn accept(&mut self, method: &Method, url: &str, body: &str) -> std::result::Result<(), Rejection> {
        if *method != Method::Post {
            return Err(Rejection::MethodNotAllowed(method.to_string()));
        }
        let assertion = extract_assertion(body, url).ok_or(Rejection::MissingAssertion)?;
        if self.delivered {
            return Err(Rejection::AlreadyDelivered);
        }
        self.tx.send(assertion).map_err(|_| Rejection::ReceiverGone)?;
        self.delivered = true;
        Ok(())
    }
}

pub struct CallbackServer {
    server: Server,
    sender: AssertionSender,
}

impl CallbackServer {
    pub fn bind(addr: &str) -> Result<(Self, AssertionReceiver)> {
        let server = Server::http(addr).map_err(|e| AppError::CallbackBind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let (sender, receiver) = handoff();
        Ok((Self { server, sender }, receiver))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serves until the process exits.
    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.serve())
    }

    fn serve(mut self) {
        for request in self.server.incoming_requests() {
            Self::handle(&mut self.sender, request);
        }
    }

    fn handle(sender: &mut AssertionSender, mut request: Request) {
        let mut body = String::new();
        if let Err(e) = request.as_reader().read_to_string(&mut body) {
            warn!(error = %e, "Failed reading callback request body");
        }
        let method = request.method().clone();
        let url = request.url().to_string();

        let (page, status) = match sender.accept(&method, &url, &body) {
            Ok(()) => {
                info!("SAML response delivered");
                (Page::Success, 200)
            }
            Err(rejection) => {
                match &rejection {
                    Rejection::MethodNotAllowed(m) => {
                        error!(method = %m, "POST method expected");
                    }
                    Rejection::MissingAssertion => error!("{} field empty", ASSERTION_FIELD),
                    Rejection::AlreadyDelivered => {
                        warn!("SAML response already delivered for this session; ignoring");
                    }
                    Rejection::ReceiverGone => error!("No one is waiting for the SAML response"),
                }
                (Page::Error, rejection.status())
            }
        };

        if let Err(e) = request.respond(page.into_response(status)) {
            warn!(error = %e, "Failed writing callback response");
        }
    }
}
