//! Inbound line handling: the observation pipeline and whois enrichment.
//!
//! Numerics we care about are handled directly; private messages go to
//! the command dispatcher; everything else is scanned with the
//! operator-configured lifecycle regexes.

use super::{NickWhois, PendingCheck, Sentry};
use crate::mask::{Event, mask_compile};
use crate::users::User;
use slirc_proto::{Command, Message, Prefix, Response};
use tokio::time::Instant;
use tracing::{error, info, warn};

impl Sentry {
    /// Handle one inbound line.
    pub async fn handle_line(&mut self, msg: Message) {
        self.note_self_source(&msg);

        match &msg.command {
            Command::Response(Response::RPL_WELCOME, _) => self.on_welcome().await,
            Command::Response(Response::RPL_YOUREOPER, _) => self.on_youreoper().await,
            Command::Response(Response::RPL_WHOISACCOUNT, params) => {
                // :server 330 me nick account :is logged in as
                if let [_, nick, account, ..] = params.as_slice()
                    && let Some(user) = self.users.get(nick)
                {
                    user.write().account = Some(account.clone());
                }
            }
            Command::Response(Response::RPL_WHOISSECURE, params) => {
                if let Some(nick) = params.get(1)
                    && let Some(user) = self.users.get(nick)
                {
                    user.write().secure = true;
                }
            }
            Command::Response(Response::RPL_ENDOFWHOIS, params) => {
                if let Some(nick) = params.get(1) {
                    let nick = nick.clone();
                    self.on_end_of_whois(&nick).await;
                }
            }
            Command::PRIVMSG(target, text) => {
                let from_me = msg
                    .source_nickname()
                    .map(|n| self.transport.is_me(n))
                    .unwrap_or(true);
                if !from_me && self.transport.is_me(target) {
                    let nick = msg.source_nickname().unwrap_or_default().to_string();
                    let source = match &msg.prefix {
                        Some(prefix) => prefix.to_string(),
                        None => nick.clone(),
                    };
                    let text = text.clone();
                    self.on_private_message(&nick, &source, &text).await;
                } else {
                    self.scan_raw(&msg).await;
                }
            }
            _ => self.scan_raw(&msg).await,
        }
    }

    /// Learn our own hostmask from lines the server stamps with it.
    fn note_self_source(&mut self, msg: &Message) {
        if let Some(Prefix::Nickname(nick, user, host)) = &msg.prefix
            && !user.is_empty()
            && !host.is_empty()
            && self.transport.is_me(nick)
        {
            self.self_source = Some(format!("{nick}!{user}@{host}"));
        }
    }

    /// Connection-ready: rebuild in-memory state from the store, then
    /// oper up.
    async fn on_welcome(&mut self) {
        self.active.clear();
        self.reasons.clear();

        match self.db.masks().list_enabled().await {
            Ok(rows) => {
                for (mask_id, raw) in rows {
                    match mask_compile(&raw) {
                        Ok(compiled) => self.active.insert(mask_id, compiled),
                        Err(e) => {
                            warn!(mask_id, mask = %raw, error = %e, "Stored mask failed to compile")
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to load masks"),
        }
        match self.db.reasons().list().await {
            Ok(rows) => {
                for (key, value) in rows {
                    self.reasons.insert(&key, value);
                }
            }
            Err(e) => error!(error = %e, "Failed to load reason templates"),
        }
        info!(masks = self.active.len(), "Active masks compiled");

        let nickname = self.config.nickname.clone();
        self.send_best_effort(
            Command::Raw("MODE".into(), vec![nickname, "+g".into()]).into(),
        )
        .await;
        for channel in self.config.report_channels() {
            self.send_best_effort(Message::join(channel)).await;
        }
        self.oper_up().await;
    }

    /// Opered up: subscribe to far/near cliconn and nick-change notices.
    async fn on_youreoper(&mut self) {
        info!("Opered up, subscribing to client lifecycle notices");
        let nickname = self.config.nickname.clone();
        self.send_best_effort(
            Command::Raw(
                "MODE".into(),
                vec![nickname, "-s+s".into(), "+Fcn".into()],
            )
            .into(),
        )
        .await;
    }

    /// End of a whois: correlate with the nick-change queue head.
    ///
    /// Correlation by nick is correct even across a rename race: the
    /// response we get belongs to whoever holds the nick now, and that
    /// holder is the legitimate subject of the check.
    async fn on_end_of_whois(&mut self, nick: &str) {
        let Some(front) = self.nick_change_whois.front() else {
            return;
        };
        if front.nick != nick {
            return;
        }
        let NickWhois { should_check, .. } = self
            .nick_change_whois
            .pop_front()
            .expect("front exists");

        if should_check && let Some(user) = self.users.get(nick) {
            let snapshot = user.read().clone();
            self.mask_check(nick, &snapshot, Event::Nick).await;
        }
    }

    /// Private message to us: echo it to the operator channel, then
    /// dispatch as a command.
    async fn on_private_message(&mut self, nick: &str, source: &str, text: &str) {
        self.announce(&format!("[PV] <{source}> {text}")).await;

        let (command, args) = match text.split_once(' ') {
            Some((command, args)) => (command, args),
            None => (text, ""),
        };
        let command = command.to_lowercase();
        self.dispatch_command(nick, source, &command, args).await;
    }

    /// Scan an unhandled line with the lifecycle regexes.
    async fn scan_raw(&mut self, msg: &Message) {
        let rawline = msg.to_string();
        let rawline = rawline.trim_end();

        if let Some(caps) = self.config.cliconnre.captures(rawline) {
            let nick = caps["nick"].to_string();
            let ident = caps["user"].to_string();
            let host = caps["host"].to_string();
            let real = caps["real"].to_string();
            // the regex might not have an `ip` group; "0" is the remote
            // spoof placeholder
            let ip = caps
                .name("ip")
                .map(|m| m.as_str().to_string())
                .filter(|ip| ip != "0");
            self.on_cliconn(nick, User::new(ident, host, real, ip)).await;
        } else if let Some(caps) = self.config.cliexitre.captures(rawline) {
            let nick = caps["nick"].to_string();
            self.users.remove(&nick);
        } else if let Some(caps) = self.config.clinickre.captures(rawline) {
            let old = caps["old"].to_string();
            let new = caps["new"].to_string();
            self.on_clinick(&old, &new).await;
        }
    }

    async fn on_cliconn(&mut self, nick: String, user: User) {
        let user = self.users.insert(&nick, user);
        // whois for account and transport security
        self.send_best_effort(Command::WHOIS(None, nick.clone()).into())
            .await;
        self.to_check.push_back(PendingCheck {
            queued_at: Instant::now(),
            nick,
            user,
        });
    }

    async fn on_clinick(&mut self, old: &str, new: &str) {
        if self.users.rename(old, new).is_none() {
            return;
        }
        // UID-form nicks come from forced-resv or collision and must not
        // re-trigger matching
        let should_check = !new
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(true);
        self.nick_change_whois.push_back(NickWhois {
            nick: new.to_string(),
            should_check,
        });
        self.send_best_effort(Command::WHOIS(None, new.to_string()).into())
            .await;
    }
}
