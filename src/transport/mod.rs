//! The chat-client transport contract.
//!
//! The engine talks to the network exclusively through [`Transport`]:
//! framed sends, a pre-formatted raw escape hatch, and a correlated
//! `wait_for` that parks the caller until a line matching one of its
//! descriptors arrives. Everything else about the connection (framing,
//! TLS, registration) is the transport implementation's business.

mod challenge;
mod irc;

pub use challenge::{Challenge, ChallengeError};
pub use irc::IrcTransport;

use async_trait::async_trait;
use slirc_proto::{Command, Message, irc_eq};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] slirc_proto::error::ProtocolError),
    #[error("bad server name: {0}")]
    BadServerName(String),
    #[error("connection closed")]
    Closed,
    #[error("sasl authentication failed: {0}")]
    Sasl(String),
}

/// A positional parameter constraint inside a [`ResponseSpec`].
#[derive(Debug, Clone)]
pub enum ParamSpec {
    /// Anything, as long as the parameter exists.
    Any,
    /// Our own nick, case-folded.
    Me,
    /// A specific value, case-folded.
    Folded(String),
}

/// One acceptable response shape: a command (numeric string or verb) and
/// leading parameter constraints.
#[derive(Debug, Clone)]
pub struct ResponseSpec {
    command: String,
    params: Vec<ParamSpec>,
}

impl ResponseSpec {
    pub fn new(command: impl Into<String>, params: Vec<ParamSpec>) -> Self {
        ResponseSpec {
            command: command.into(),
            params,
        }
    }

    fn matches(&self, msg: &Message, me: &str) -> bool {
        let (command, params): (String, &[String]) = match &msg.command {
            Command::Response(resp, params) => (format!("{:03}", *resp as u16), params.as_slice()),
            Command::Raw(name, params) => (name.clone(), params.as_slice()),
            Command::AUTHENTICATE(data) => ("AUTHENTICATE".into(), std::slice::from_ref(data)),
            _ => return false,
        };
        if command != self.command {
            return false;
        }
        for (i, spec) in self.params.iter().enumerate() {
            let Some(param) = params.get(i) else {
                return false;
            };
            match spec {
                ParamSpec::Any => {}
                ParamSpec::Me => {
                    if !irc_eq(param, me) {
                        return false;
                    }
                }
                ParamSpec::Folded(value) => {
                    if !irc_eq(param, value) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// The set of response shapes a `wait_for` accepts.
#[derive(Debug, Clone, Default)]
pub struct ResponseSet {
    specs: Vec<ResponseSpec>,
}

impl ResponseSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn or(mut self, spec: ResponseSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Whether a message satisfies any descriptor in the set.
    pub fn matches(&self, msg: &Message, me: &str) -> bool {
        self.specs.iter().any(|spec| spec.matches(msg, me))
    }
}

/// Operations the engine requires of the chat client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueue a framed protocol message.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Send a pre-formatted line verbatim.
    async fn send_raw(&self, line: &str) -> Result<(), TransportError>;

    /// Park until a line matching the set arrives, consuming it.
    async fn wait_for(&self, set: ResponseSet) -> Result<Message, TransportError>;

    /// Whether `nick` is our current nick.
    fn is_me(&self, nick: &str) -> bool;
}
