//! The expiry scheduler pass.
//!
//! Positive expiry values are absolute deadlines; negative values mean
//! "that long after the last hit". Lethal actions decay to WARN so the
//! mask keeps reporting; everything else is switched off and leaves the
//! active set.

use super::{EXPIRE_INTERVAL, Sentry, now_ts};
use crate::mask::{MaskAction, MaskType};
use std::time::Duration;
use tracing::{info, warn};

impl Sentry {
    /// One expiry pass over the active set. Returns the time until the
    /// nearest upcoming deadline, at most the regular interval.
    pub async fn expire_masks(&mut self) -> Duration {
        let now = now_ts();
        let mut next_wake = EXPIRE_INTERVAL;

        for mask_id in self.active.ids() {
            let record = match self.db.masks().get(mask_id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(mask_id, error = %e, "Failed to fetch mask during expiry");
                    continue;
                }
            };
            let Some(expire) = record.expire else {
                continue;
            };
            let deadline = if expire < 0 {
                // relative-to-last-hit; a mask that never hit never expires
                match record.last_hit {
                    Some(last_hit) => last_hit + expire.abs(),
                    None => continue,
                }
            } else {
                expire
            };

            if deadline > now {
                next_wake = next_wake.min(Duration::from_secs((deadline - now) as u64));
                continue;
            }

            let actor = self.self_actor();
            let old = record.mtype;
            match old.action() {
                MaskAction::Kill | MaskAction::Lethal => {
                    let downgraded = MaskType::new(MaskAction::Warn);
                    if let Err(e) = self
                        .db
                        .masks()
                        .set_type(&actor, mask_id, downgraded, "expire to WARN")
                        .await
                    {
                        warn!(mask_id, error = %e, "Failed to downgrade expired mask");
                        continue;
                    }
                    if let Err(e) = self
                        .db
                        .masks()
                        .set_expire(&actor, mask_id, None, "expire cleared")
                        .await
                    {
                        warn!(mask_id, error = %e, "Failed to clear expiry");
                        continue;
                    }
                    info!(mask_id, mask = %record.mask, "Expired mask downgraded to WARN");
                    self.announce(&format!("MASK:EXPIRE: {} {} -> WARN", record.mask, old))
                        .await;
                }
                _ => {
                    if let Err(e) = self
                        .db
                        .masks()
                        .set_expire(&actor, mask_id, None, "expire cleared")
                        .await
                    {
                        warn!(mask_id, error = %e, "Failed to clear expiry");
                        continue;
                    }
                    if let Err(e) = self.db.masks().toggle(&actor, mask_id).await {
                        warn!(mask_id, error = %e, "Failed to disable expired mask");
                        continue;
                    }
                    self.active.remove(mask_id);
                    info!(mask_id, mask = %record.mask, "Expired mask disabled");
                    self.announce(&format!("MASK:EXPIRE: {} {}", record.mask, old))
                        .await;
                }
            }
        }
        next_wake
    }
}
