//! Opering up: plain OPER, or the RSA challenge exchange when a key
//! file is configured. A challenge failure is logged and the bot keeps
//! running un-opered; commands then silently drop.

use super::Sentry;
use crate::transport::{
    Challenge, ChallengeError, ParamSpec, ResponseSet, ResponseSpec, TransportError,
};
use slirc_proto::Command;
use std::path::Path;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
enum OperError {
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Sentry {
    pub(super) async fn oper_up(&mut self) {
        let oper = self.config.oper.clone();
        match oper.key_file() {
            Some(keyfile) => {
                if let Err(e) = self.oper_challenge(&oper.name, &keyfile).await {
                    error!(error = %e, "CHALLENGE failed, continuing un-opered");
                }
            }
            None => {
                self.send_best_effort(Command::OPER(oper.name, oper.pass).into())
                    .await;
            }
        }
    }

    async fn oper_challenge(&mut self, name: &str, keyfile: &Path) -> Result<(), OperError> {
        let mut challenge = Challenge::load(keyfile)?;
        self.transport
            .send(Command::Raw("CHALLENGE".into(), vec![name.to_string()]).into())
            .await?;

        let set = ResponseSet::new()
            .or(ResponseSpec::new("740", vec![ParamSpec::Me, ParamSpec::Any]))
            .or(ResponseSpec::new("741", vec![ParamSpec::Me]));
        loop {
            let line = self.transport.wait_for(set.clone()).await?;
            match &line.command {
                Command::Raw(cmd, params) if cmd == "740" => {
                    if let Some(fragment) = params.get(1) {
                        challenge.push(fragment);
                    }
                }
                _ => break,
            }
        }

        let retort = challenge.finalise()?;
        self.transport
            .send(Command::Raw("CHALLENGE".into(), vec![format!("+{retort}")]).into())
            .await?;
        Ok(())
    }
}
