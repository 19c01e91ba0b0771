//! Scenario: the engine and the operator share a file channel from separate
//! processes.
//!
//! # Invariants under test
//! - A reply written by one handle is seen by another handle's poll.
//! - Malformed inbox lines are skipped but still advance the cursor.
//! - An unwritable outbox makes `notify` report `false` instead of erroring.
//! - The limiter spaces alerts per kind, independent of other kinds.

use chrono::{Duration, TimeZone, Utc};
use rg_notify::{AlertLimiter, FileNotifier, Notifier};
use std::io::Write;

#[test]
fn reply_from_operator_handle_reaches_engine_handle() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileNotifier::new(dir.path(), "engine").unwrap();
    let operator = FileNotifier::new(dir.path(), "operator").unwrap();

    let start = engine.poll_decisions(None).unwrap().next_cursor;
    operator.reply("1", Utc::now()).unwrap();

    let poll = engine.poll_decisions(start).unwrap();
    assert_eq!(poll.messages.len(), 1);
    assert_eq!(poll.messages[0].text, "1");
    assert!(!poll.messages[0].from_bot);
}

#[test]
fn malformed_lines_are_skipped_and_consumed() {
    let dir = tempfile::tempdir().unwrap();
    let n = FileNotifier::new(dir.path(), "engine").unwrap();
    n.reply("2", Utc::now()).unwrap();
    {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(n.inbox_path())
            .unwrap();
        writeln!(f, "this is not json").unwrap();
    }
    n.reply("1", Utc::now()).unwrap();

    let poll = n.poll_decisions(Some(0)).unwrap();
    let texts: Vec<_> = poll.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["2", "1"]);
    assert_eq!(poll.next_cursor, Some(3));
}

#[test]
fn outbox_failure_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let n = FileNotifier::new(dir.path(), "engine").unwrap();
    std::fs::create_dir(n.outbox_path()).unwrap();
    assert!(!n.notify("LIMITS", &["blocked".to_string()]));
}

#[test]
fn limiter_spaces_each_kind_separately() {
    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let mut limiter =
        AlertLimiter::new(Duration::seconds(5)).with_kind("LIMITS", Duration::seconds(60));

    assert!(limiter.allow("LIMITS", t0));
    assert!(limiter.allow("PER_TRADE", t0));
    assert!(!limiter.allow("LIMITS", t0 + Duration::seconds(30)));
    assert!(limiter.allow("PER_TRADE", t0 + Duration::seconds(5)));
    assert!(limiter.allow("LIMITS", t0 + Duration::seconds(60)));
}
