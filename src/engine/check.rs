//! The matcher and the action selector.
//!
//! One observation yields its references, is recorded in the ring and is
//! run over the active set. All matched masks are hit; the best-ranked
//! one decides the enforcement action, its delay and its reporting.

use super::Sentry;
use crate::db::MaskRecord;
use crate::mask::{Event, MaskAction, MaskType, build_references};
use crate::templates::split_reason;
use crate::users::User;
use rand::Rng;
use slirc_proto::{Command, Message};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

impl Sentry {
    /// Match one observation against the active set, in ascending id
    /// order, recording the observation in the ring.
    fn mask_match(&mut self, nick: &str, user: &User, event: Event) -> Vec<i64> {
        let references = build_references(nick, user, event);
        let mut matches = Vec::new();
        for (mask_id, mask) in self.active.iter() {
            if mask.matches_any(&references) {
                matches.push(mask_id);
            }
        }
        self.recent.push(references);
        matches
    }

    /// Check one observation and enforce the best-ranked match.
    pub async fn mask_check(&mut self, nick: &str, user: &User, event: Event) {
        self.idle_reset().await;

        let match_ids = self.mask_match(nick, user, event);
        if match_ids.is_empty() {
            return;
        }

        for &mask_id in &match_ids {
            if let Err(e) = self.db.masks().hit(mask_id).await {
                warn!(mask_id, error = %e, "Failed to record hit");
            }
        }

        let mut matches: Vec<(i64, MaskRecord)> = Vec::new();
        for &mask_id in &match_ids {
            match self.db.masks().get(mask_id).await {
                Ok(record) => matches.push((mask_id, record)),
                Err(e) => warn!(mask_id, error = %e, "Failed to fetch matched mask"),
            }
        }

        let Some((mask_id, record)) = decide(&matches) else {
            return;
        };
        let record = record.clone();
        let actions: HashSet<MaskAction> =
            matches.iter().map(|(_, r)| r.mtype.action()).collect();

        self.enforce(mask_id, &record, &actions, nick, user).await;
    }

    async fn enforce(
        &mut self,
        mask_id: i64,
        record: &MaskRecord,
        actions: &HashSet<MaskAction>,
        nick: &str,
        user: &User,
    ) {
        let mtype = record.mtype;
        let action = mtype.action();

        let mask_id_text = mask_id.to_string();
        let stored_reason = record.reason.clone().unwrap_or_default();
        let reason = self
            .reasons
            .expand(&stored_reason, &[("mask_id", mask_id_text.as_str())]);
        let (user_reason, oper_reason) = split_reason(&reason);

        // if the user doesn't have identd, bin the whole ident
        let ban_user = if user.ident.starts_with('~') {
            "*"
        } else {
            user.ident.as_str()
        };
        let ban_host = user.ip.as_deref().unwrap_or(&user.host);
        let ban_time = rand::thread_rng().gen_range(160..=320_u32).to_string();

        let command = match action {
            MaskAction::Lethal => Some(expand_bancmd(
                &self.config.bancmd,
                &[
                    ("mask_id", mask_id_text.as_str()),
                    ("nick", nick),
                    ("user", user.ident.as_str()),
                    ("host", user.host.as_str()),
                    ("ip", user.ip.as_deref().unwrap_or("")),
                    ("ban_user", ban_user),
                    ("ban_host", ban_host),
                    ("ban_time", ban_time.as_str()),
                    ("reason", reason.as_str()),
                    ("user_reason", user_reason),
                    ("oper_reason", oper_reason),
                ],
            )),
            MaskAction::Kill => Some(message_line(Command::KILL(
                nick.to_string(),
                user_reason.to_string(),
            ))),
            MaskAction::Resv => Some(message_line(Command::Raw(
                "RESV".into(),
                vec![
                    "60".into(),
                    nick.to_string(),
                    "ON".into(),
                    "*".into(),
                    format!("reserved by mask {mask_id}"),
                ],
            ))),
            MaskAction::Warn | MaskAction::Exclude => None,
        };

        if let Some(line) = command {
            if mtype.has(MaskType::DELAY) {
                let delay = if mtype.has(MaskType::QUICK) {
                    Duration::from_secs(3)
                } else {
                    Duration::from_secs_f64(rand::thread_rng().gen_range(1.0..=10.0))
                };
                self.delayed.push(Reverse((Instant::now() + delay, line)));
            } else if let Err(e) = self.transport.send_raw(&line).await {
                warn!(error = %e, "Dropped enforcement send");
            }
        }

        // we matched an EXCLUDE and no other types: do not log
        if action == MaskAction::Exclude && actions.len() == 1 {
            return;
        }

        let log = format!(
            "MASK: {mtype} mask {mask_id} {nick}!{}@{} {} [{oper_reason}]",
            user.ident, user.host, user.real_name
        );
        if mtype.has(MaskType::QUIET) {
            self.announce_verbose(&log).await;
        } else if mtype.has(MaskType::SILENT) {
            // log nowhere
        } else {
            self.announce_everywhere(&log).await;
        }
    }
}

/// Pick the winning match: highest weight, lowest id between equals.
fn decide(matches: &[(i64, MaskRecord)]) -> Option<(i64, &MaskRecord)> {
    let mut best: Option<(i64, &MaskRecord)> = None;
    for (mask_id, record) in matches {
        let better = match &best {
            None => true,
            Some((_, current)) => record.mtype.weight() > current.mtype.weight(),
        };
        if better {
            best = Some((*mask_id, record));
        }
    }
    best
}

/// Serialize a command to the wire line it would produce.
fn message_line(command: Command) -> String {
    Message::from(command).to_string().trim_end().to_string()
}

/// Expand `{key}` placeholders in the configured ban command.
fn expand_bancmd(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
