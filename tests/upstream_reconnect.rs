//! Integration tests for upstream loss and reconnection.

mod common;

use common::{FakeUpstream, TestBouncer};

#[tokio::test]
async fn test_reconnects_and_rejoins_channels() {
    let upstream = FakeUpstream::bind().await.unwrap();
    let bnc = TestBouncer::start().await.unwrap();
    bnc.add_account("alice", "secret", Some(upstream.port()))
        .unwrap();

    let mut client = bnc.login("alice", "secret", "alice").await.unwrap();
    let (mut up, _) = upstream.accept_registered().await.unwrap();
    client.expect("Connected to").await.unwrap();

    up.send_raw(":alice!alice@host JOIN #rust,#tokio").await.unwrap();
    client.expect("JOIN #rust,#tokio").await.unwrap();

    // Server goes away
    drop(up);
    let lines = client.expect("Reconnecting in").await.unwrap();
    assert!(
        lines.iter().any(|l| l.contains("Disconnected from 127.0.0.1:")),
        "{lines:?}"
    );

    let (mut up, nick) = upstream.accept_registered().await.unwrap();
    assert_eq!(nick, "alice");
    client.expect("Connected to").await.unwrap();

    let mut joined = Vec::new();
    for _ in 0..2 {
        let lines = up.expect("JOIN").await.unwrap();
        joined.push(lines.last().cloned().unwrap_or_default());
    }
    joined.sort();
    assert_eq!(joined, vec!["JOIN #rust", "JOIN #tokio"]);
}

#[tokio::test]
async fn test_nick_in_use_falls_back_during_registration() {
    let upstream = FakeUpstream::bind().await.unwrap();
    let bnc = TestBouncer::start().await.unwrap();
    let account = bnc
        .add_account("alice", "secret", Some(upstream.port()))
        .unwrap();
    account.update_upstream(|u| u.altnick = Some("alicia".to_string()));

    let mut client = bnc.login("alice", "secret", "alice").await.unwrap();
    let mut up = upstream.accept().await.unwrap();
    assert_eq!(up.expect_registration().await.unwrap(), "alice");

    up.send_raw(":upstream.test 433 * alice :Nickname is already in use")
        .await
        .unwrap();
    let retry = up.expect("NICK").await.unwrap();
    assert_eq!(retry.last().map(String::as_str), Some("NICK alicia"));

    up.welcome("alicia").await.unwrap();
    let lines = client.expect("Connected to").await.unwrap();
    assert!(lines.iter().any(|l| l == ":alice NICK alicia"), "{lines:?}");
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let upstream = FakeUpstream::bind().await.unwrap();
    let bnc = TestBouncer::start_with(|config| {
        config.upstream.reconnect.initial_delay = 0;
        config.upstream.reconnect.max_delay = 0;
        config.upstream.reconnect.max_attempts = 1;
    })
    .await
    .unwrap();
    let account = bnc
        .add_account("alice", "secret", Some(upstream.port()))
        .unwrap();

    let mut client = bnc.login("alice", "secret", "alice").await.unwrap();
    let (up, _) = upstream.accept_registered().await.unwrap();
    client.expect("Connected to").await.unwrap();
    assert!(account.connection().is_some());

    // Server and listener both go away, so the single retry is refused
    drop(up);
    drop(upstream);
    let lines = client.expect("Giving up").await.unwrap();
    assert!(
        lines.iter().any(|l| l.contains("Reconnect attempt 1 failed")),
        "{lines:?}"
    );

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while account.connection().is_some() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(account.connection().is_none());
}
