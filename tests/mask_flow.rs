//! Observation pipeline and enforcement flow.

mod common;

use common::*;
use slirc_sentry::db::Actor;
use slirc_sentry::mask::{MaskAction, MaskType};
use std::sync::Arc;
use std::time::Duration;

fn actor() -> Actor {
    Actor::new("oper!o@staff.example", Some("oper".to_string()))
}

#[tokio::test]
async fn literal_lethal_ban_bins_ident_and_uses_ip() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    db.reasons()
        .add("greeting", "you are banned")
        .await
        .unwrap();
    let id = db
        .masks()
        .add(
            &actor(),
            "\"badguy!\"",
            MaskType::new(MaskAction::Lethal),
            "$greeting|",
        )
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    assert_eq!(sentry.active_ids(), vec![id]);
    transport.clear();

    sentry
        .handle_line(conn_line("badguy", "~x", "1.2.3.4", "1.2.3.4", "real name"))
        .await;
    assert_eq!(sentry.pending_check_count(), 1);
    sentry.drain_pending_checks().await;
    assert_eq!(sentry.pending_check_count(), 0);

    // the configured ban command fired immediately with the binned
    // ident, the address and an in-range ban time
    let raw = transport.raw_lines();
    assert_eq!(raw.len(), 1, "{raw:?}");
    let line = &raw[0];
    assert!(line.starts_with("KLINE "), "{line}");
    let ban_time: u32 = line.split_whitespace().nth(1).unwrap().parse().unwrap();
    assert!((160..=320).contains(&ban_time), "{line}");
    assert!(line.contains("*@1.2.3.4"), "{line}");
    assert!(line.contains(":you are banned|"), "{line}");
    assert!(line.contains(&format!("mask {id}")), "{line}");

    let record = db.masks().get(id).await.unwrap();
    assert_eq!(record.hits, 1);
    assert!(record.last_hit.is_some());

    // reported to both channels
    let sent = transport.sent_lines();
    let expected = format!("MASK: LETHAL mask {id} badguy!~x@1.2.3.4 real name");
    assert!(
        sent.iter()
            .any(|l| l.starts_with("PRIVMSG #opers :") && l.contains(&expected)),
        "{sent:?}"
    );
    assert!(
        sent.iter()
            .any(|l| l.starts_with("PRIVMSG #opers-verbose :") && l.contains(&expected)),
        "{sent:?}"
    );
}

#[tokio::test]
async fn exclude_wins_but_mixed_match_still_logs() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    db.masks()
        .add(&actor(), "/foo/", MaskType::new(MaskAction::Lethal), "|l")
        .await
        .unwrap();
    let exclude = db
        .masks()
        .add(&actor(), "/foo/", MaskType::new(MaskAction::Exclude), "|e")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    sentry
        .handle_line(conn_line("foo", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;

    // the exclude outranks the lethal: no enforcement command
    assert!(transport.raw_lines().is_empty());
    // but other action types matched too, so the hit is logged
    let sent = transport.sent_lines();
    assert!(
        sent.iter()
            .any(|l| l.contains(&format!("MASK: EXCLUDE mask {exclude}"))),
        "{sent:?}"
    );
}

#[tokio::test]
async fn exclude_only_match_is_not_logged() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    db.masks()
        .add(&actor(), "/foo/", MaskType::new(MaskAction::Exclude), "|e")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    sentry
        .handle_line(conn_line("foo", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;

    assert!(transport.raw_lines().is_empty());
    assert!(
        transport
            .sent_lines()
            .iter()
            .all(|l| !l.contains("MASK:")),
        "{:?}",
        transport.sent_lines()
    );
}

#[tokio::test]
async fn nick_change_matches_only_with_nick_flag() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let with_n = db
        .masks()
        .add(&actor(), "/^spam/N", MaskType::new(MaskAction::Warn), "|n")
        .await
        .unwrap();
    let without_n = db
        .masks()
        .add(&actor(), "/^spam/", MaskType::new(MaskAction::Warn), "|c")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    // connect as alice: neither matches
    sentry
        .handle_line(conn_line("alice", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;
    assert_eq!(db.masks().get(with_n).await.unwrap().hits, 0);

    // rename to spambot: checked after the whois round-trip, and only
    // the N-flagged mask fires
    sentry.handle_line(nick_line("alice", "spambot")).await;
    sentry.handle_line(end_of_whois("spambot")).await;

    assert_eq!(db.masks().get(with_n).await.unwrap().hits, 1);
    assert_eq!(db.masks().get(without_n).await.unwrap().hits, 0);
    let sent = transport.sent_lines();
    assert!(
        sent.iter()
            .any(|l| l.contains(&format!("MASK: WARN mask {with_n} spambot!u@h.example"))),
        "{sent:?}"
    );
}

#[tokio::test]
async fn uid_form_nick_change_is_not_checked() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/./N", MaskType::new(MaskAction::Warn), "|any")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    sentry
        .handle_line(conn_line("victim", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;
    transport.clear();

    sentry.handle_line(nick_line("victim", "123AAAABC")).await;
    sentry.handle_line(end_of_whois("123AAAABC")).await;

    let hits_after = db.masks().get(id).await.unwrap().hits;
    assert_eq!(hits_after, 1, "only the connect check hit");
    assert!(
        transport.sent_lines().iter().all(|l| !l.contains("MASK: ")),
        "{:?}",
        transport.sent_lines()
    );
}

#[tokio::test]
async fn nick_change_moves_snapshot_and_resets_account() {
    let (mut sentry, _transport, _db, _dir) = build_sentry().await;
    sentry.handle_line(welcome()).await;

    sentry
        .handle_line(conn_line("alice", "u", "h.example", "0", "real"))
        .await;
    sentry.handle_line(whois_account("alice", "alice")).await;

    let before = sentry.user("alice").unwrap();
    assert_eq!(before.read().account.as_deref(), Some("alice"));

    sentry.handle_line(nick_line("alice", "bob")).await;
    assert!(sentry.user("alice").is_none());
    let after = sentry.user("bob").unwrap();
    assert!(Arc::ptr_eq(&before, &after), "same snapshot object");
    assert!(after.read().account.is_none(), "identity must be re-proven");
}

#[tokio::test]
async fn rapid_disconnect_is_debounced_away() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(&actor(), "/badguy/", MaskType::new(MaskAction::Lethal), "|x")
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    sentry
        .handle_line(conn_line("badguy", "u", "h.example", "0", "real"))
        .await;
    // killed by an upstream scanner before our debounce elapsed
    sentry.handle_line(exit_line("badguy")).await;
    sentry.drain_pending_checks().await;

    assert!(transport.raw_lines().is_empty());
    assert_eq!(db.masks().get(id).await.unwrap().hits, 0);
}

#[tokio::test]
async fn quick_delay_schedules_three_seconds_out() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    db.masks()
        .add(
            &actor(),
            "/badguy/",
            MaskType::new(MaskAction::Lethal)
                .with(MaskType::DELAY)
                .with(MaskType::QUICK),
            "|x",
        )
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    let before = tokio::time::Instant::now();
    sentry
        .handle_line(conn_line("badguy", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;
    let after = tokio::time::Instant::now();

    // scheduled exactly three seconds from the check, not sent
    assert!(transport.raw_lines().is_empty());
    let fire_times = sentry.delayed_fire_times();
    assert_eq!(fire_times.len(), 1);
    assert!(fire_times[0] - before >= Duration::from_secs(3));
    assert!(fire_times[0] - after <= Duration::from_secs(3));

    // not due yet
    sentry.drain_delayed_sends().await;
    assert!(transport.raw_lines().is_empty());

    // from here on nothing touches the database, so virtual time is safe
    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(4)).await;
    sentry.drain_delayed_sends().await;
    let raw = transport.raw_lines();
    assert_eq!(raw.len(), 1);
    assert!(raw[0].starts_with("KLINE "), "{raw:?}");
}

#[tokio::test]
async fn plain_delay_schedules_between_one_and_ten_seconds() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    db.masks()
        .add(
            &actor(),
            "/badguy/",
            MaskType::new(MaskAction::Lethal).with(MaskType::DELAY),
            "|x",
        )
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    let before = tokio::time::Instant::now();
    sentry
        .handle_line(conn_line("badguy", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;

    let fire_times = sentry.delayed_fire_times();
    assert_eq!(fire_times.len(), 1);
    let delay = fire_times[0] - before;
    assert!(delay >= Duration::from_secs(1), "{delay:?}");
    assert!(delay <= Duration::from_secs(11), "{delay:?}");
    assert!(transport.raw_lines().is_empty());
}

#[tokio::test]
async fn kill_action_sends_kill_with_user_reason() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    let id = db
        .masks()
        .add(
            &actor(),
            "/badguy/",
            MaskType::new(MaskAction::Kill),
            "go away|spam wave",
        )
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    sentry
        .handle_line(conn_line("badguy", "u", "h.example", "0", "real"))
        .await;
    sentry.drain_pending_checks().await;

    let raw = transport.raw_lines();
    assert_eq!(raw, vec!["KILL badguy :go away".to_string()]);
    // the oper half of the reason goes to the log line only
    let sent = transport.sent_lines();
    assert!(
        sent.iter()
            .any(|l| l.contains(&format!("MASK: KILL mask {id}")) && l.contains("[spam wave]")),
        "{sent:?}"
    );
}

#[tokio::test]
async fn spoofed_ip_connection_also_matches_by_address() {
    let (mut sentry, transport, db, _dir) = build_sentry().await;
    db.masks()
        .add(
            &actor(),
            "\"@192.0.2.\"",
            MaskType::new(MaskAction::Warn),
            "|by ip",
        )
        .await
        .unwrap();

    sentry.handle_line(welcome()).await;
    transport.clear();

    // host is a spoof, ip differs: the second reference carries the ip
    sentry
        .handle_line(conn_line("sneak", "u", "spoof/host", "192.0.2.77", "real"))
        .await;
    sentry.drain_pending_checks().await;

    let sent = transport.sent_lines();
    assert!(
        sent.iter().any(|l| l.contains("MASK: WARN mask")),
        "{sent:?}"
    );
    assert_eq!(sentry.recent_len(), 1, "one observation, two references");
}
