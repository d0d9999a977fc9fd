//! The sentry engine.
//!
//! One task owns every mutable structure: the users table, the active
//! mask set, the reason templates, the recent-observation ring, the
//! pending-check queue, the nick-change whois queue and the delayed-send
//! heap. The run loop multiplexes inbound lines with the periodic drains,
//! so matching is atomic with respect to catalog mutations by
//! construction.

mod active;
mod check;
mod commands;
mod expire;
mod lines;
mod oper;
mod ring;

pub use active::ActiveMasks;
pub use commands::Registry;
pub use ring::RecentRing;

use crate::config::Config;
use crate::db::{Actor, Database};
use crate::mask::Event;
use crate::templates::ReasonTemplates;
use crate::transport::Transport;
use crate::users::{UserRef, UserTable};
use slirc_proto::Message;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Drain cadence for the delayed-send heap and the pending-check queue.
const TICK: Duration = Duration::from_millis(100);
/// Upper bound between expiry passes.
const EXPIRE_INTERVAL: Duration = Duration::from_secs(60);
/// Default debounce before acting on a fresh connection.
const DEBOUNCE: Duration = Duration::from_secs(3);

/// One queued connect check.
struct PendingCheck {
    queued_at: Instant,
    nick: String,
    user: UserRef,
}

/// One outstanding nick-change whois correlation.
struct NickWhois {
    nick: String,
    should_check: bool,
}

/// The engine actor.
pub struct Sentry {
    config: Config,
    db: Database,
    transport: Arc<dyn Transport>,
    registry: Registry,

    users: UserTable,
    active: ActiveMasks,
    reasons: ReasonTemplates,
    recent: RecentRing,

    to_check: VecDeque<PendingCheck>,
    nick_change_whois: VecDeque<NickWhois>,
    delayed: BinaryHeap<Reverse<(Instant, String)>>,

    debounce: Duration,
    /// Our own hostmask as the server has echoed it, for change records.
    self_source: Option<String>,
}

impl Sentry {
    pub fn new(config: Config, db: Database, transport: Arc<dyn Transport>) -> Self {
        let recent = RecentRing::new(config.history);
        Sentry {
            config,
            db,
            transport,
            registry: Registry::new(),
            users: UserTable::new(),
            active: ActiveMasks::new(),
            reasons: ReasonTemplates::new(),
            recent,
            to_check: VecDeque::new(),
            nick_change_whois: VecDeque::new(),
            delayed: BinaryHeap::new(),
            debounce: DEBOUNCE,
            self_source: None,
        }
    }

    /// Drive the engine until the line stream closes or shutdown is
    /// requested.
    pub async fn run(
        mut self,
        mut lines: mpsc::Receiver<Message>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_expiry = Instant::now() + EXPIRE_INTERVAL;

        loop {
            tokio::select! {
                maybe_line = lines.recv() => match maybe_line {
                    Some(msg) => self.handle_line(msg).await,
                    None => {
                        info!("Line stream closed, stopping engine");
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.drain_delayed_sends().await;
                    self.drain_pending_checks().await;
                },
                _ = tokio::time::sleep_until(next_expiry) => {
                    let wake = self.expire_masks().await;
                    next_expiry = Instant::now() + wake.min(EXPIRE_INTERVAL);
                },
                _ = shutdown.recv() => {
                    info!("Shutdown requested, draining due sends");
                    self.drain_delayed_sends().await;
                    break;
                }
            }
        }
    }

    /// Send due entries from the delayed-send heap, in fire-time order.
    pub async fn drain_delayed_sends(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((fire_at, _))) = self.delayed.peek() {
            if *fire_at > now {
                break;
            }
            let Some(Reverse((_, line))) = self.delayed.pop() else {
                break;
            };
            if let Err(e) = self.transport.send_raw(&line).await {
                warn!(error = %e, "Dropped delayed enforcement send");
            }
        }
    }

    /// Run checks whose debounce has elapsed. Snapshots that went away
    /// in the meantime are skipped: their client is already gone.
    pub async fn drain_pending_checks(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.to_check.front() {
            if now.duration_since(front.queued_at) < self.debounce {
                break;
            }
            let Some(check) = self.to_check.pop_front() else {
                break;
            };
            let snapshot = check.user.read().clone();
            if snapshot.connected {
                self.mask_check(&check.nick, &snapshot, Event::Connect).await;
            }
        }
    }

    /// Send ourselves a PM to reset our idle time.
    async fn idle_reset(&self) {
        if self.config.antiidle {
            self.send_best_effort(Message::privmsg(&self.config.nickname, "hello self"))
                .await;
        }
    }

    /// Send, dropping the message on transport failure. The transport
    /// owns reconnection; the next welcome rebuilds our state.
    async fn send_best_effort(&self, msg: Message) {
        if let Err(e) = self.transport.send(msg).await {
            warn!(error = %e, "Send failed, message dropped");
        }
    }

    /// Report to the main operator channel.
    async fn announce(&self, text: &str) {
        self.send_best_effort(Message::privmsg(&self.config.channel, text))
            .await;
    }

    /// Report to the verbose channel only.
    async fn announce_verbose(&self, text: &str) {
        self.send_best_effort(Message::privmsg(&self.config.verbose, text))
            .await;
    }

    /// Report to every configured channel, deduplicated.
    async fn announce_everywhere(&self, text: &str) {
        for channel in self.config.report_channels() {
            self.send_best_effort(Message::privmsg(channel, text)).await;
        }
    }

    /// NOTICE a caller, line by line.
    async fn notice(&self, nick: &str, lines: &[String]) {
        for line in lines {
            self.send_best_effort(Message::notice(nick, line.clone()))
                .await;
        }
    }

    /// The actor used for changes the engine makes on its own behalf.
    fn self_actor(&self) -> Actor {
        Actor::new(
            self.self_source
                .clone()
                .unwrap_or_else(|| self.config.nickname.clone()),
            None,
        )
    }

    // Test and introspection accessors.

    pub fn active_ids(&self) -> Vec<i64> {
        self.active.ids()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    pub fn user(&self, nick: &str) -> Option<UserRef> {
        self.users.get(nick)
    }

    pub fn pending_check_count(&self) -> usize {
        self.to_check.len()
    }

    /// Fire times of everything currently on the delayed-send heap.
    pub fn delayed_fire_times(&self) -> Vec<Instant> {
        self.delayed
            .iter()
            .map(|Reverse((fire_at, _))| *fire_at)
            .collect()
    }

    /// Shorten the connect debounce (used by tests).
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }
}

/// Wall-clock seconds.
fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
