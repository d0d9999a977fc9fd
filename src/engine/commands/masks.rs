//! Mask catalog commands.

use super::Caller;
use crate::db::{DbError, MaskRecord};
use crate::engine::{Sentry, now_ts};
use crate::error::{CommandError, CommandResult};
use crate::mask::{MaskAction, MaskError, MaskType, mask_compile, mask_token};
use crate::util::{parse_duration, to_pretty_time};
use slirc_proto::FormattedStringExt;

/// How many change rows GETMASK shows without `-all`.
const CHANGES_SHOWN: usize = 10;

fn parse_mask_id(arg: Option<&str>) -> Result<i64, CommandError> {
    let arg = arg.ok_or_else(|| CommandError::Usage("please provide a mask id".into()))?;
    arg.parse()
        .map_err(|_| CommandError::Usage("that's not an id/number".into()))
}

fn format_mask(mask_id: i64, record: &MaskRecord) -> String {
    let last_hit = match record.last_hit {
        Some(ts) => format!(", last hit {} ago", to_pretty_time(now_ts() - ts)),
        None => String::new(),
    };
    format!(
        "{:>3}: \x02{}\x02 ({} hits{last_hit}) \x02{}\x02 [{}]",
        mask_id,
        record.mask,
        record.hits,
        record.mtype,
        record.reason.as_deref().unwrap_or("")
    )
}

/// The hostmask line of a reference, for operator-facing listings.
fn reference_line(reference: &str) -> &str {
    reference
        .split_once('\n')
        .map(|(_, line)| line)
        .unwrap_or(reference)
}

impl Sentry {
    pub(super) async fn cmd_getmask(&mut self, args: &str) -> CommandResult {
        let mut parts = args.split_whitespace();
        let mask_id = parse_mask_id(parts.next())?;
        let all = parts.next() == Some("-all");

        if !self.db.masks().has_id(mask_id).await? {
            return Err(CommandError::NotFound(mask_id));
        }
        let record = self.db.masks().get(mask_id).await?;
        let changes = self.db.masks().changes(mask_id).await?;

        let mut outs = vec![format_mask(mask_id, &record)];
        let shown = if all || changes.len() <= CHANGES_SHOWN {
            &changes[..]
        } else {
            &changes[changes.len() - CHANGES_SHOWN..]
        };
        if !shown.is_empty() {
            outs.push("\x02changes:\x02".into());
        }
        for change in shown {
            let who = match &change.by_oper {
                Some(oper) => format!("{} ({oper})", change.by_source),
                None => change.by_source.clone(),
            };
            let when = chrono::DateTime::from_timestamp(change.time, 0)
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
                .unwrap_or_else(|| change.time.to_string());
            outs.push(format!(" {when} by \x02{who}\x02: {}", change.change));
        }
        Ok(outs)
    }

    pub(super) async fn cmd_addmask(&mut self, caller: &Caller, args: &str) -> CommandResult {
        let (mask, reason) =
            mask_token(args).map_err(|e| CommandError::Usage(format!("syntax error: {e}")))?;
        let mask = mask.strip_formatting();
        if reason.trim().is_empty() {
            return Err(CommandError::Usage("please provide a mask reason".into()));
        }
        let compiled = match mask_compile(&mask) {
            Ok(compiled) => compiled,
            Err(e @ MaskError::Regex(_)) => return Err(CommandError::Compile(e)),
            Err(e) => return Err(CommandError::Usage(format!("syntax error: {e}"))),
        };

        // with no explicit divider, treat the whole reason as
        // oper-facing; safer than assuming public
        let mut reason = reason.trim().to_string();
        if !reason.contains('|') {
            reason = format!("|{reason}");
        }

        let mask_id = self
            .db
            .masks()
            .add(
                &caller.actor(),
                &mask,
                MaskType::new(MaskAction::Warn),
                &reason,
            )
            .await?;
        self.active.insert(mask_id, compiled.clone());

        let matched = self.recent.dry_run(&compiled).len();
        Ok(vec![format!(
            "added {mask_id} (hits {matched} out of last {} users)",
            self.recent.len()
        )])
    }

    pub(super) async fn cmd_togglemask(&mut self, caller: &Caller, args: &str) -> CommandResult {
        let mask_id = parse_mask_id(args.split_whitespace().next())?;
        if !self.db.masks().has_id(mask_id).await? {
            return Err(CommandError::NotFound(mask_id));
        }
        let record = self.db.masks().get(mask_id).await?;

        // compile before the durable flip so a stored mask that no
        // longer compiles never half-enables
        let compiled = if record.enabled {
            None
        } else {
            match mask_compile(&record.mask) {
                Ok(compiled) => Some(compiled),
                Err(e) => return Ok(vec![format!("stored mask failed to compile: {e}")]),
            }
        };

        let enabled = self.db.masks().toggle(&caller.actor(), mask_id).await?;
        if enabled {
            self.active
                .insert(mask_id, compiled.expect("compiled before enabling"));
        } else {
            self.active.remove(mask_id);
        }

        let enabled_text = if enabled { "enabled" } else { "disabled" };
        self.announce(&format!(
            "{} TOGGLEMASK: {enabled_text} {} mask \x02{}\x02",
            caller.pretty(),
            record.mtype,
            record.mask
        ))
        .await;
        Ok(vec![format!(
            "{} mask {mask_id} {enabled_text}",
            record.mtype
        )])
    }

    pub(super) async fn cmd_setmask(&mut self, caller: &Caller, args: &str) -> CommandResult {
        let mut parts = args.split_whitespace();
        let mask_id = parse_mask_id(parts.next())?;

        let mut expire: Option<(String, i64)> = None;
        let mut new_type: Option<MaskType> = None;
        for part in parts {
            if let Some(rest) = part.strip_prefix('+') {
                let duration = parse_duration(rest)
                    .ok_or_else(|| CommandError::Usage(format!("bad duration \x02{part}\x02")))?;
                expire = Some((part.to_string(), now_ts() + duration));
            } else if let Some(rest) = part.strip_prefix('~') {
                let duration = parse_duration(rest)
                    .ok_or_else(|| CommandError::Usage(format!("bad duration \x02{part}\x02")))?;
                expire = Some((part.to_string(), -duration));
            } else {
                match MaskType::parse(part) {
                    Ok(mtype) => new_type = Some(mtype),
                    Err(e) => return Ok(vec![e.to_string()]),
                }
            }
        }
        if expire.is_none() && new_type.is_none() {
            return Err(CommandError::Usage("not enough params".into()));
        }

        if !self.db.masks().has_id(mask_id).await? {
            return Err(CommandError::NotFound(mask_id));
        }
        let record = self.db.masks().get(mask_id).await?;

        let actor = caller.actor();
        let mut outs = Vec::new();

        // type first: the repository refuses a no-op retype, and that
        // refusal must abort the invocation before any expiry write
        if let Some(mtype) = new_type {
            match self
                .db
                .masks()
                .set_type(&actor, mask_id, mtype, &format!("type {mtype}"))
                .await
            {
                Ok(()) => {}
                Err(DbError::AlreadyType { .. }) => {
                    return Err(CommandError::AlreadyType(format!(
                        "{} is already {mtype}",
                        record.mask
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            self.announce(&format!(
                "{} SETMASK: type {mtype} \x02{}\x02 (was {})",
                caller.pretty(),
                record.mask,
                record.mtype
            ))
            .await;
            outs.push(format!(
                "{} changed from {} to {}",
                record.mask, record.mtype, mtype
            ));
        }

        if let Some((token, value)) = expire {
            self.db
                .masks()
                .set_expire(&actor, mask_id, Some(value), &format!("expire {token}"))
                .await?;
            self.announce(&format!(
                "{} SETMASK: expire {token} \x02{}\x02",
                caller.pretty(),
                record.mask
            ))
            .await;
            outs.push(format!("{} expire set to {token}", record.mask));
        }
        Ok(outs)
    }

    pub(super) async fn cmd_listmask(&mut self) -> CommandResult {
        let mut outs = Vec::new();
        for mask_id in self.active.ids() {
            let record = self.db.masks().get(mask_id).await?;
            outs.push(format_mask(mask_id, &record));
        }
        let count = outs.len();
        outs.push(format!("{count} active masks"));
        Ok(outs)
    }

    pub(super) async fn cmd_testmask(&mut self, args: &str) -> CommandResult {
        let (mask, rest) =
            mask_token(args).map_err(|e| CommandError::Usage(format!("syntax error: {e}")))?;
        let mask = mask.strip_formatting();
        let compiled = match mask_compile(&mask) {
            Ok(compiled) => compiled,
            Err(e @ MaskError::Regex(_)) => return Err(CommandError::Compile(e)),
            Err(e) => return Err(CommandError::Usage(format!("syntax error: {e}"))),
        };

        let limit = if rest.trim() == "-all" {
            self.config.history
        } else {
            10
        };

        let matched = self.recent.dry_run(&compiled);
        let samples = self.recent.len();
        if matched.is_empty() {
            return Ok(vec![format!("mask \x02{mask}\x02 matches 0 out of {samples}")]);
        }

        let mut outs = vec![format!("mask \x02{mask}\x02 matches...")];
        for reference in matched.iter().take(limit) {
            outs.push(format!(" {}", reference_line(reference)));
        }
        if matched.len() > limit {
            outs.push(format!(" (and {} more)", matched.len() - limit));
        }
        outs.push(format!("... out of {samples}"));
        Ok(outs)
    }

    pub(super) async fn cmd_compilemask(&mut self, args: &str) -> CommandResult {
        let (mask, _) =
            mask_token(args).map_err(|e| CommandError::Usage(format!("syntax error: {e}")))?;
        let mask = mask.strip_formatting();
        match mask_compile(&mask) {
            Ok(compiled) => Ok(vec![format!(
                "\x02{mask}\x02 compiles to: {}",
                compiled.as_str().replace('\n', "\\n")
            )]),
            Err(e @ MaskError::Regex(_)) => Err(CommandError::Compile(e)),
            Err(e) => Err(CommandError::Usage(format!("syntax error: {e}"))),
        }
    }
}
