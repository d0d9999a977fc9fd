//! Integration test common infrastructure.
//!
//! Provides a scripted mock transport and helpers for building an engine
//! over a temporary database.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use slirc_proto::Message;
use slirc_sentry::config::Config;
use slirc_sentry::db::Database;
use slirc_sentry::engine::Sentry;
use slirc_sentry::transport::{ResponseSet, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Arc;

/// A transport that records every send and answers `wait_for` from a
/// scripted reply queue.
pub struct MockTransport {
    nick: String,
    sent: Mutex<Vec<String>>,
    raw: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<Message>>,
}

impl MockTransport {
    pub fn new(nick: &str) -> Arc<Self> {
        Arc::new(MockTransport {
            nick: nick.to_string(),
            sent: Mutex::new(Vec::new()),
            raw: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
        })
    }

    /// Queue a server line to answer a later `wait_for`.
    pub fn queue_reply(&self, line: &str) {
        self.replies
            .lock()
            .push_back(line.parse().expect("reply line parses"));
    }

    /// Framed sends so far, serialized without CRLF.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Raw sends so far.
    pub fn raw_lines(&self) -> Vec<String> {
        self.raw.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
        self.raw.lock().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.sent
            .lock()
            .push(message.to_string().trim_end().to_string());
        Ok(())
    }

    async fn send_raw(&self, line: &str) -> Result<(), TransportError> {
        self.raw.lock().push(line.trim_end().to_string());
        Ok(())
    }

    async fn wait_for(&self, set: ResponseSet) -> Result<Message, TransportError> {
        let mut replies = self.replies.lock();
        let pos = replies
            .iter()
            .position(|msg| set.matches(msg, &self.nick))
            .ok_or(TransportError::Closed)?;
        Ok(replies.remove(pos).expect("position exists"))
    }

    fn is_me(&self, nick: &str) -> bool {
        slirc_proto::irc_eq(nick, &self.nick)
    }
}

/// The sentry's nick in every test.
pub const NICK: &str = "sentry";

/// A complete config with test-friendly lifecycle regexes.
pub fn test_config() -> Config {
    let yaml = r#"
server: "irc.example.net:6667"
nickname: sentry
password: null
oper:
  name: sentry
  pass: swordfish
channel: "#opers"
verbose: "#opers-verbose"
antiidle: false
history: 1000
database: "unused.db"
cliconnre: "CLICONN (?P<nick>\\S+) (?P<user>\\S+) (?P<host>\\S+) (?P<ip>\\S+) (?P<real>.*)"
cliexitre: "CLIEXIT (?P<nick>\\S+)"
clinickre: "NICKCHANGE (?P<old>\\S+) (?P<new>\\S+)"
bancmd: "KLINE {ban_time} {ban_user}@{ban_host} :{user_reason}|{oper_reason} mask {mask_id}"
"#;
    serde_yaml::from_str(yaml).expect("test config parses")
}

/// An engine over a fresh temporary database and a mock transport. The
/// debounce is zeroed so drains fire immediately.
pub async fn build_sentry() -> (Sentry, Arc<MockTransport>, Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentry.db");
    let db = Database::new(path.to_str().unwrap()).await.unwrap();

    let transport = MockTransport::new(NICK);
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let mut sentry = Sentry::new(test_config(), db.clone(), dyn_transport);
    sentry.set_debounce(std::time::Duration::ZERO);
    (sentry, transport, db, dir)
}

pub fn parse_line(line: &str) -> Message {
    line.parse().expect("test line parses")
}

/// The welcome numeric that makes the engine load its state.
pub fn welcome() -> Message {
    parse_line(&format!(
        ":irc.example.net 001 {NICK} :Welcome to the Example network {NICK}"
    ))
}

pub fn conn_line(nick: &str, user: &str, host: &str, ip: &str, real: &str) -> Message {
    parse_line(&format!(
        ":irc.example.net NOTICE * :CLICONN {nick} {user} {host} {ip} {real}"
    ))
}

pub fn exit_line(nick: &str) -> Message {
    parse_line(&format!(":irc.example.net NOTICE * :CLIEXIT {nick}"))
}

pub fn nick_line(old: &str, new: &str) -> Message {
    parse_line(&format!(
        ":irc.example.net NOTICE * :NICKCHANGE {old} {new}"
    ))
}

/// End-of-whois for a nick, as enrichment correlation sees it.
pub fn end_of_whois(nick: &str) -> Message {
    parse_line(&format!(
        ":irc.example.net 318 {NICK} {nick} :End of /WHOIS list."
    ))
}

/// Whois-account numeric binding `nick` to `account`.
pub fn whois_account(nick: &str, account: &str) -> Message {
    parse_line(&format!(
        ":irc.example.net 330 {NICK} {nick} {account} :is logged in as"
    ))
}

/// A private message from an operator to the sentry.
pub fn privmsg_to_me(from: &str, text: &str) -> Message {
    parse_line(&format!(":{from}!user@host.example PRIVMSG {NICK} :{text}"))
}

/// Queue the whois reply that verifies `nick` as an oper.
pub fn queue_oper_reply(transport: &MockTransport, nick: &str, oper: &str) {
    transport.queue_reply(&format!(
        ":irc.example.net 313 {NICK} {nick} :is opered as {oper}, privset {oper}"
    ));
}

/// Queue the whois reply for a non-operator.
pub fn queue_non_oper_reply(transport: &MockTransport, nick: &str) {
    transport.queue_reply(&format!(
        ":irc.example.net 318 {NICK} {nick} :End of /WHOIS list."
    ));
}
