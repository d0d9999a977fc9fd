//! Operator command dispatch.
//!
//! Commands arrive as private messages. The sender is verified as an
//! operator by a synchronous whois before anything else happens;
//! non-operators are silently dropped. Dispatch goes through a
//! declarative registry carrying each command's usage lines.

mod masks;
mod reasons;

use super::Sentry;
use crate::db::Actor;
use crate::error::{CommandError, CommandResult};
use crate::transport::{ParamSpec, ResponseSet, ResponseSpec};
use regex::Regex;
use slirc_proto::{Command, Response};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Extracts the oper name from a whois operator line.
static OPER_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^is opered as (\S+)(?:,|$)").expect("static regex compiles"));

#[derive(Debug, Clone, Copy)]
enum CommandKind {
    Getmask,
    Addmask,
    Togglemask,
    Setmask,
    Listmask,
    Addreason,
    Delreason,
    Listreason,
    Testmask,
    Compilemask,
}

/// One registry entry: the command, its usage lines, its handler.
struct CommandSpec {
    name: &'static str,
    usage: &'static [&'static str],
    kind: CommandKind,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "getmask",
        usage: &["<mask-id> [-all]"],
        kind: CommandKind::Getmask,
    },
    CommandSpec {
        name: "addmask",
        usage: &[
            "/<regex>/<flags> <public reason>[|<oper reason>]",
            "\"<string>\"<flags> <public reason>[|<oper reason>]",
            "%<glob>%<flags> <public reason>[|<oper reason>]",
        ],
        kind: CommandKind::Addmask,
    },
    CommandSpec {
        name: "togglemask",
        usage: &["<mask-id>"],
        kind: CommandKind::Togglemask,
    },
    CommandSpec {
        name: "setmask",
        usage: &["<mask-id> [+<duration>|~<duration>] [<type>]"],
        kind: CommandKind::Setmask,
    },
    CommandSpec {
        name: "listmask",
        usage: &[],
        kind: CommandKind::Listmask,
    },
    CommandSpec {
        name: "addreason",
        usage: &["<alias> <text ...>"],
        kind: CommandKind::Addreason,
    },
    CommandSpec {
        name: "delreason",
        usage: &["<alias>"],
        kind: CommandKind::Delreason,
    },
    CommandSpec {
        name: "listreason",
        usage: &[],
        kind: CommandKind::Listreason,
    },
    CommandSpec {
        name: "testmask",
        usage: &["/<pattern>/<flags> [-all]"],
        kind: CommandKind::Testmask,
    },
    CommandSpec {
        name: "compilemask",
        usage: &["<mask>"],
        kind: CommandKind::Compilemask,
    },
];

/// Command registry, populated at init.
pub struct Registry {
    commands: HashMap<&'static str, &'static CommandSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            commands: COMMANDS.iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    fn get(&self, name: &str) -> Option<&'static CommandSpec> {
        self.commands.get(name).copied()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Who issued a command: reply nick, full hostmask, verified oper name.
pub(super) struct Caller {
    pub nick: String,
    pub source: String,
    pub oper: Option<String>,
}

impl Caller {
    pub fn actor(&self) -> Actor {
        Actor::new(self.source.clone(), self.oper.clone())
    }

    pub fn pretty(&self) -> String {
        self.actor().pretty()
    }
}

impl Sentry {
    /// Verify, look up and execute one operator command.
    pub(super) async fn dispatch_command(
        &mut self,
        nick: &str,
        source: &str,
        command: &str,
        args: &str,
    ) {
        // not an operator: silently drop, no error to the sender
        let Some(oper) = self.verify_oper(nick).await else {
            return;
        };

        let Some(spec) = self.registry.get(command) else {
            self.notice(
                nick,
                &[format!(
                    "\x02{}\x02 is not a valid command",
                    command.to_uppercase()
                )],
            )
            .await;
            return;
        };

        let caller = Caller {
            nick: nick.to_string(),
            source: source.to_string(),
            oper,
        };
        let outs = match self.run_command(spec.kind, &caller, args).await {
            Ok(outs) => outs,
            Err(CommandError::Usage(error)) => {
                let mut outs = vec![error];
                for usage in spec.usage {
                    outs.push(format!("usage: {} {usage}", spec.name.to_uppercase()));
                }
                outs
            }
            Err(error) => {
                debug!(command = spec.name, code = error.error_code(), "Command failed");
                vec![error.to_string()]
            }
        };
        self.notice(&caller.nick, &outs).await;
    }

    async fn run_command(
        &mut self,
        kind: CommandKind,
        caller: &Caller,
        args: &str,
    ) -> CommandResult {
        match kind {
            CommandKind::Getmask => self.cmd_getmask(args).await,
            CommandKind::Addmask => self.cmd_addmask(caller, args).await,
            CommandKind::Togglemask => self.cmd_togglemask(caller, args).await,
            CommandKind::Setmask => self.cmd_setmask(caller, args).await,
            CommandKind::Listmask => self.cmd_listmask().await,
            CommandKind::Addreason => self.cmd_addreason(args).await,
            CommandKind::Delreason => self.cmd_delreason(args).await,
            CommandKind::Listreason => self.cmd_listreason().await,
            CommandKind::Testmask => self.cmd_testmask(args).await,
            CommandKind::Compilemask => self.cmd_compilemask(args).await,
        }
    }

    /// Synchronously whois a nick. `None` means not an operator;
    /// `Some(None)` means opered with an anonymous grant.
    async fn verify_oper(&mut self, nick: &str) -> Option<Option<String>> {
        if let Err(e) = self
            .transport
            .send(Command::WHOIS(None, nick.to_string()).into())
            .await
        {
            warn!(error = %e, "Whois send failed");
            return None;
        }

        let set = ResponseSet::new()
            .or(ResponseSpec::new(
                "313",
                vec![ParamSpec::Me, ParamSpec::Folded(nick.to_string())],
            ))
            .or(ResponseSpec::new(
                "318",
                vec![ParamSpec::Me, ParamSpec::Folded(nick.to_string())],
            ));
        let line = match self.transport.wait_for(set).await {
            Ok(line) => line,
            Err(_) => return None,
        };

        match &line.command {
            Command::Response(Response::RPL_WHOISOPERATOR, params) => {
                let text = params.get(2)?;
                let caps = OPER_NAME_RE.captures(text)?;
                let name = caps[1].to_string();
                // an anonymous grant verifies the oper but names nobody
                Some(if name == "<grant>" { None } else { Some(name) })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_command() {
        let registry = Registry::new();
        for name in [
            "getmask",
            "addmask",
            "togglemask",
            "setmask",
            "listmask",
            "addreason",
            "delreason",
            "listreason",
            "testmask",
            "compilemask",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.get("smite").is_none());
    }

    #[test]
    fn oper_name_regex() {
        let caps = OPER_NAME_RE
            .captures("is opered as sandcat, privset sandcat")
            .unwrap();
        assert_eq!(&caps[1], "sandcat");

        let caps = OPER_NAME_RE.captures("is opered as lone").unwrap();
        assert_eq!(&caps[1], "lone");

        assert!(OPER_NAME_RE.captures("is an IRC Operator").is_none());
    }
}
