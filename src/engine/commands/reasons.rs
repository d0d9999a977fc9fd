//! Reason template commands.

use crate::engine::Sentry;
use crate::error::{CommandError, CommandResult};

impl Sentry {
    pub(super) async fn cmd_addreason(&mut self, args: &str) -> CommandResult {
        let mut parts = args.splitn(2, char::is_whitespace);
        let alias = parts
            .next()
            .filter(|alias| !alias.is_empty())
            .ok_or_else(|| CommandError::Usage("not enough params".into()))?
            .to_lowercase();
        let text = parts
            .next()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| CommandError::Usage("not enough params".into()))?;

        if self.db.reasons().has_key(&alias).await? {
            return Ok(vec![format!(
                "reason alias \x02${alias}\x02 already exists"
            )]);
        }
        self.db.reasons().add(&alias, text).await?;
        self.reasons.insert(&alias, text);
        Ok(vec![format!("added reason alias \x02${alias}\x02")])
    }

    pub(super) async fn cmd_delreason(&mut self, args: &str) -> CommandResult {
        let alias = args
            .split_whitespace()
            .next()
            .ok_or_else(|| CommandError::Usage("not enough params".into()))?
            .to_lowercase();

        if self.db.reasons().delete(&alias).await? {
            self.reasons.remove(&alias);
            Ok(vec![format!("deleted reason alias \x02${alias}\x02")])
        } else {
            Ok(vec![format!(
                "the reason alias \x02${alias}\x02 does not exist"
            )])
        }
    }

    pub(super) async fn cmd_listreason(&mut self) -> CommandResult {
        let outs: Vec<String> = self
            .reasons
            .list()
            .into_iter()
            .map(|(alias, text)| format!("\x02${alias}\x02: {text}"))
            .collect();
        if outs.is_empty() {
            Ok(vec!["no reason aliases".into()])
        } else {
            Ok(outs)
        }
    }
}
