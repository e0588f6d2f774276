//! Integration tests for the client connection lifecycle.
//!
//! Login, upstream registration, detaching and reattaching.

mod common;

use common::{FakeUpstream, TestBouncer};

#[tokio::test]
async fn test_login_relays_upstream_registration() {
    let upstream = FakeUpstream::bind().await.expect("bind upstream");
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", Some(upstream.port()))
        .expect("create account");

    let mut client = bnc.login("alice", "secret", "alice").await.expect("login");

    let (mut up, nick) = upstream.accept_registered().await.expect("upstream registration");
    assert_eq!(nick, "alice");

    let lines = client.expect("Connected to").await.expect("connected notice");
    assert!(
        lines.iter().any(|l| l.starts_with(":upstream.test 001 alice ")),
        "upstream 001 not relayed: {lines:?}"
    );

    // Client traffic goes upstream untouched
    client.send_raw("PRIVMSG #rust :hello").await.unwrap();
    let sent = up.expect("PRIVMSG").await.unwrap();
    assert_eq!(sent.last().map(String::as_str), Some("PRIVMSG #rust :hello"));
}

#[tokio::test]
async fn test_ping_is_answered_by_bouncer() {
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", None).unwrap();

    let mut client = bnc.login("alice", "secret", "alice").await.expect("login");
    client.send_raw("PING :token123").await.unwrap();
    let lines = client.expect("PONG").await.unwrap();
    assert!(lines.last().unwrap().ends_with(":token123"));
}

#[tokio::test]
async fn test_wrong_password_closes_after_max_attempts() {
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", None).unwrap();

    let mut client = bnc.connect().await.unwrap();
    client.send_raw("PASS alice:wrong").await.unwrap();
    client.send_raw("NICK alice").await.unwrap();
    client.send_raw("USER alice 0 * :Alice").await.unwrap();

    let lines = client.expect("attempt(s) remaining").await.unwrap();
    assert!(lines.iter().any(|l| l.contains(" 464 ")), "{lines:?}");

    client.send_raw("PASS alice:still-wrong").await.unwrap();
    let rest = client.expect_closed().await.unwrap();
    assert!(
        rest.iter().any(|l| l.starts_with("ERROR :Closing link")),
        "{rest:?}"
    );
}

#[tokio::test]
async fn test_unknown_account_is_rejected() {
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", None).unwrap();

    let mut client = bnc.connect().await.unwrap();
    client.send_raw("PASS mallory:secret").await.unwrap();
    client.send_raw("NICK mallory").await.unwrap();
    client.send_raw("USER mallory 0 * :Mallory").await.unwrap();

    let lines = client.expect("attempt(s) remaining").await.unwrap();
    assert!(lines.iter().any(|l| l.contains(" 464 ")));
    assert!(!bnc.bouncer.accounts().exists("mallory"));
}

#[tokio::test]
async fn test_detach_sets_away_and_reattach_replays_channels() {
    let upstream = FakeUpstream::bind().await.expect("bind upstream");
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", Some(upstream.port()))
        .unwrap();

    let mut first = bnc.login("alice", "secret", "alice").await.unwrap();
    let (mut up, _) = upstream.accept_registered().await.unwrap();
    first.expect("Connected to").await.unwrap();

    first.send_raw("JOIN #rust").await.unwrap();
    up.expect("JOIN #rust").await.unwrap();
    up.send_raw(":alice!alice@host JOIN #rust").await.unwrap();
    first.expect("JOIN #rust").await.unwrap();

    // Last client leaves: the upstream session stays and goes away
    first.send_raw("QUIT :bye").await.unwrap();
    first.expect_closed().await.unwrap();
    let away = up.expect("AWAY").await.unwrap();
    assert_eq!(away.last().map(String::as_str), Some("AWAY :detached"));
    assert!(!away.iter().any(|l| l.starts_with("QUIT")));

    // A new client under another nick is brought up to date
    let mut second = bnc.connect().await.unwrap();
    let login = second.login("alice", "secret", "alice_away").await.unwrap();
    assert!(login.iter().any(|l| l == ":alice_away NICK alice"), "{login:?}");
    assert!(login.last().unwrap().starts_with(":upstream.test 001 alice "));

    let replay = second.expect("JOIN #rust").await.unwrap();
    assert_eq!(replay.last().map(String::as_str), Some(":alice JOIN #rust"));

    let requests = up.expect("AWAY").await.unwrap();
    assert!(requests.contains(&"TOPIC #rust".to_string()), "{requests:?}");
    assert!(requests.contains(&"NAMES #rust".to_string()), "{requests:?}");
    assert_eq!(requests.last().map(String::as_str), Some("AWAY"));
}

#[tokio::test]
async fn test_default_sub_client_is_shared() {
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", None).unwrap();

    let mut first = bnc.login("alice", "secret", "alice").await.unwrap();
    first.expect("No upstream servers configured").await.unwrap();
    let mut second = bnc.login("alice", "secret", "alice").await.unwrap();
    second.expect("No upstream servers configured").await.unwrap();

    let account = bnc.bouncer.accounts().get("alice").unwrap();
    assert_eq!(account.socket_count(), 2);

    second.send_raw("QUIT :bye").await.unwrap();
    second.expect_closed().await.unwrap();
    first.send_raw("PING :still-here").await.unwrap();
    first.expect("still-here").await.unwrap();
    assert_eq!(account.socket_count(), 1);
}

#[tokio::test]
async fn test_named_sub_client_takes_over_slot() {
    let bnc = TestBouncer::start().await.expect("start bouncer");
    bnc.add_account("alice", "secret", None).unwrap();

    let mut old = bnc.login("alice+work", "secret", "alice").await.unwrap();
    old.expect("No upstream servers configured").await.unwrap();
    let mut plain = bnc.login("alice", "secret", "alice").await.unwrap();
    plain.expect("No upstream servers configured").await.unwrap();

    let _new = bnc.login("alice+work", "secret", "alice").await.unwrap();
    let lines = old.expect_closed().await.unwrap();
    assert!(
        lines.iter().any(|l| l.contains("Another client logged in")),
        "{lines:?}"
    );

    let account = bnc.bouncer.accounts().get("alice").unwrap();
    assert_eq!(account.socket_count(), 2);
}
