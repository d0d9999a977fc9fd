//! Expiry scheduler behavior.

mod common;

use common::*;
use slirc_sentry::db::Actor;
use slirc_sentry::mask::{MaskAction, MaskType};
use std::time::Duration;

fn actor() -> Actor {
    Actor::new("oper!o@staff.example", Some("oper".to_string()))
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::test]
async fn expired_lethal_downgrades_to_warn_and_stays_enabled() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/x/", MaskType::new(MaskAction::Lethal), "|x")
        .await
        .unwrap();
    db.masks()
        .set_expire(&actor(), id, Some(now_ts() - 10), "expire +past")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();
    sentry.expire_masks().await;

    let record = db.masks().get(id).await.unwrap();
    assert_eq!(record.mtype.action(), MaskAction::Warn);
    assert!(record.enabled, "downgraded mask keeps watching");
    assert!(record.expire.is_none());
    assert!(sentry.active_ids().contains(&id));

    let changes = db.masks().changes(id).await.unwrap();
    assert!(
        changes.iter().any(|c| c.change == "expire to WARN"),
        "{changes:?}"
    );
    // the engine is its own actor here, with no oper name
    let downgrade = changes
        .iter()
        .find(|c| c.change == "expire to WARN")
        .unwrap();
    assert!(downgrade.by_oper.is_none());

    let sent = transport.sent_lines();
    assert!(
        sent.iter().any(|l| l.contains("MASK:EXPIRE: /x/ LETHAL -> WARN")),
        "{sent:?}"
    );
}

#[tokio::test]
async fn relative_expiry_after_last_hit_disables() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/y/", MaskType::new(MaskAction::Exclude), "|y")
        .await
        .unwrap();
    db.masks()
        .set_expire(&actor(), id, Some(-86400), "expire ~1d")
        .await
        .unwrap();
    sqlx::query("UPDATE masks SET last_hit=? WHERE id=?")
        .bind(now_ts() - 86401)
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();
    sentry.expire_masks().await;

    let record = db.masks().get(id).await.unwrap();
    assert!(!record.enabled);
    assert!(record.expire.is_none());
    assert!(!sentry.active_ids().contains(&id));
    assert_eq!(db.masks().list_enabled().await.unwrap(), vec![]);

    let sent = transport.sent_lines();
    assert!(
        sent.iter().any(|l| l.contains("MASK:EXPIRE: /y/ EXCLUDE")),
        "{sent:?}"
    );
}

#[tokio::test]
async fn relative_expiry_without_a_hit_never_fires() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/z/", MaskType::new(MaskAction::Warn), "|z")
        .await
        .unwrap();
    db.masks()
        .set_expire(&actor(), id, Some(-60), "expire ~1m")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();
    let wake = sentry.expire_masks().await;

    assert_eq!(wake, Duration::from_secs(60));
    let record = db.masks().get(id).await.unwrap();
    assert!(record.enabled);
    assert_eq!(record.expire, Some(-60));
    assert!(transport.sent_lines().is_empty());
}

#[tokio::test]
async fn upcoming_deadline_shortens_the_next_wake() {
    let (mut sentry, _transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/w/", MaskType::new(MaskAction::Warn), "|w")
        .await
        .unwrap();
    db.masks()
        .set_expire(&actor(), id, Some(now_ts() + 30), "expire +30s")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    let wake = sentry.expire_masks().await;

    assert!(wake <= Duration::from_secs(30), "{wake:?}");
    assert!(wake >= Duration::from_secs(25), "{wake:?}");
    assert!(db.masks().get(id).await.unwrap().enabled);
}

#[tokio::test]
async fn mask_without_expiry_is_untouched() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/v/", MaskType::new(MaskAction::Lethal), "|v")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();
    let wake = sentry.expire_masks().await;

    assert_eq!(wake, Duration::from_secs(60));
    assert!(db.masks().get(id).await.unwrap().enabled);
    assert!(transport.sent_lines().is_empty());
}
