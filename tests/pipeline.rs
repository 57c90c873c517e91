//! Drives assembled pipelines through a recording transport.

use proptest::prelude::*;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use topicwire::{
    App,
    ConnectionId,
    ErrorAction,
    PipelineConfig,
    http::Router,
    protocol::{Arguments, PROTOCOL_VERSION},
};
use topicwire_testing::{AppEvent, PipelineDriver, ScriptedApp, wire};

const A: ConnectionId = ConnectionId::new(1);
const B: ConnectionId = ConnectionId::new(2);

struct Fixture {
    driver: PipelineDriver<Router>,
    app: ScriptedApp,
}

fn build(app: &ScriptedApp) -> PipelineDriver<Router> {
    let config = PipelineConfig {
        server_ident: "test/1".into(),
        ..PipelineConfig::default()
    };
    PipelineDriver::new(App::new(config).route("/chat", app.clone()).build())
}

#[fixture]
fn fixture() -> Fixture {
    let app = ScriptedApp::new();
    Fixture {
        driver: build(&app),
        app,
    }
}

fn session_id(driver: &PipelineDriver<Router>, id: ConnectionId) -> String {
    driver.envelopes(id)[0][1]
        .as_str()
        .expect("session id is a string")
        .to_owned()
}

#[rstest]
fn handshake_is_answered_then_welcomed(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));

    let response = fixture.driver.transport().response(A);
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    let envelopes = fixture.driver.envelopes(A);
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0][0], 0);
    assert_eq!(envelopes[0][2], PROTOCOL_VERSION);
    assert_eq!(envelopes[0][3], "test/1");
    assert_eq!(
        fixture.app.events(),
        [AppEvent::SessionStart {
            id: A,
            session_id: session_id(&fixture.driver, A),
        }]
    );
}

#[rstest]
fn sessions_get_distinct_ids(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture.driver.open(B, "/chat", Some("localhost"));
    assert_ne!(session_id(&fixture.driver, A), session_id(&fixture.driver, B));
}

#[rstest]
#[case("/missing", Some("localhost"), "HTTP/1.1 404")]
#[case("/chat", Some("evil.example"), "HTTP/1.1 403")]
#[case("/chat", None, "HTTP/1.1 403")]
fn rejected_handshakes_close_without_a_session(
    mut fixture: Fixture,
    #[case] path: &str,
    #[case] origin: Option<&str>,
    #[case] status: &str,
) {
    fixture.driver.open(A, path, origin);
    assert!(fixture.driver.transport().response(A).starts_with(status));
    assert!(fixture.driver.transport().is_closed(A));
    assert!(fixture.app.events().is_empty());
    assert_eq!(fixture.driver.pipeline().connection_count(), 0);
}

#[rstest]
fn non_get_methods_are_refused(mut fixture: Fixture) {
    fixture.driver.connect(A);
    fixture
        .driver
        .feed(A, &b"POST /chat HTTP/1.1\r\nHost: localhost\r\nOrigin: http://localhost\r\n\r\n"[..]);
    assert!(fixture.driver.transport().response(A).starts_with("HTTP/1.1 405"));
    assert!(fixture.driver.transport().is_closed(A));
}

#[rstest]
fn oversized_header_block_closes(mut fixture: Fixture) {
    fixture.driver.connect(A);
    fixture.driver.feed(A, vec![b'a'; 5000]);
    assert!(fixture.driver.transport().is_closed(A));
    assert!(fixture.driver.transport().bytes_to(A).is_empty());
}

#[rstest]
fn pipelined_frames_follow_the_handshake(mut fixture: Fixture) {
    let mut chunk = wire::handshake("/chat", Some("localhost")).to_vec();
    chunk.extend_from_slice(&wire::envelope(&json!([2, "c1", "http://x/p#echo", 1, 2])));
    fixture.driver.connect(A);
    fixture.driver.feed(A, chunk);

    let envelopes = fixture.driver.envelopes(A);
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[1], json!([3, "c1", [1, 2]]));
}

#[rstest]
#[case(2)]
#[case(6)]
#[case(9)]
fn frame_split_across_reads_reaches_the_application(mut fixture: Fixture, #[case] split: usize) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    let frame = wire::envelope(&json!([5, "news"]));
    fixture.driver.feed(A, frame.slice(..split));
    fixture.driver.feed(A, frame.slice(split..));

    assert!(!fixture.driver.transport().is_closed(A));
    assert_eq!(
        fixture.app.events().last(),
        Some(&AppEvent::Subscribe {
            id: A,
            topic: "news".into(),
        })
    );
}

#[rstest]
fn prefixes_resolve_call_and_topic_uris(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    for envelope in [
        json!([1, "ev", "http://example.com/events"]),
        json!([2, "c1", "ev:echo", {"k": "v"}]),
        json!([5, "ev:news"]),
    ] {
        fixture.driver.feed(A, wire::envelope(&envelope));
    }

    let events = fixture.app.events();
    assert_eq!(
        events[1],
        AppEvent::Call {
            id: A,
            call_id: "c1".into(),
            proc_uri: "http://example.com/events#echo".into(),
            args: Arguments::Named(json!({"k": "v"}).as_object().cloned().unwrap_or_default()),
        }
    );
    assert_eq!(
        events[2],
        AppEvent::Subscribe {
            id: A,
            topic: "http://example.com/events#news".into(),
        }
    );
}

#[rstest]
fn publish_reaches_subscribers_except_the_publisher(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture.driver.open(B, "/chat", Some("localhost"));
    for id in [A, B] {
        fixture.driver.feed(id, wire::envelope(&json!([5, "t"])));
    }
    fixture
        .driver
        .feed(A, wire::envelope(&json!([7, "t", {"n": 1}, true])));

    assert_eq!(fixture.driver.envelopes(A).len(), 1);
    let b = fixture.driver.envelopes(B);
    assert_eq!(b.last(), Some(&json!([8, "t", {"n": 1}])));
}

#[rstest]
fn nothing_is_delivered_after_the_application_closes(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture.driver.open(B, "/chat", Some("localhost"));
    for id in [A, B] {
        fixture.driver.feed(id, wire::envelope(&json!([5, "t"])));
    }
    let mut chunk = wire::envelope(&json!([2, "c", "http://x/p#kick"])).to_vec();
    chunk.extend_from_slice(&wire::envelope(&json!([7, "t", "after-close"])));
    fixture.driver.feed(A, chunk);

    assert!(fixture.driver.transport().is_closed(A));
    assert_eq!(fixture.driver.envelopes(B).len(), 1);
    let events = fixture.app.events();
    assert!(!events.iter().any(|event| matches!(event, AppEvent::Publish { .. })));
    assert_eq!(events.last(), Some(&AppEvent::Close(A)));
}

#[rstest]
fn eligible_list_restricts_delivery(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture.driver.open(B, "/chat", Some("localhost"));
    for id in [A, B] {
        fixture.driver.feed(id, wire::envelope(&json!([5, "t"])));
    }
    let a_session = session_id(&fixture.driver, A);
    fixture
        .driver
        .feed(B, wire::envelope(&json!([7, "t", "hi", [], [a_session]])));

    assert_eq!(fixture.driver.envelopes(A).last(), Some(&json!([8, "t", "hi"])));
    assert_eq!(fixture.driver.envelopes(B).len(), 1);
}

#[rstest]
fn repeated_subscribe_notifies_once(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    for envelope in [json!([5, "t"]), json!([5, "t"]), json!([6, "t"]), json!([6, "t"])] {
        fixture.driver.feed(A, wire::envelope(&envelope));
    }
    let membership: Vec<_> = fixture
        .app
        .events()
        .into_iter()
        .filter(|event| matches!(event, AppEvent::Subscribe { .. } | AppEvent::Unsubscribe { .. }))
        .collect();
    assert_eq!(membership.len(), 2);
}

#[rstest]
#[case(json!({"not": "an array"}))]
#[case(json!([0, "s", 1, "ident"]))]
#[case(json!([5]))]
#[case(json!([42, "t"]))]
fn invalid_envelopes_close_the_connection(mut fixture: Fixture, #[case] envelope: Value) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture.driver.feed(A, wire::envelope(&envelope));

    assert!(fixture.driver.transport().is_closed(A));
    let events = fixture.app.events();
    assert_eq!(events.last(), Some(&AppEvent::Close(A)));
    assert!(!events.iter().any(|event| matches!(event, AppEvent::Error { .. })));
}

#[rstest]
#[case(ErrorAction::Close, true)]
#[case(ErrorAction::Continue, false)]
fn application_errors_follow_the_chosen_action(#[case] action: ErrorAction, #[case] closed: bool) {
    let app = ScriptedApp::new().on_error_action(action);
    let mut driver = build(&app);
    driver.open(A, "/chat", Some("localhost"));
    driver.feed(A, wire::envelope(&json!([2, "c1", "http://x/p#fail"])));

    assert_eq!(driver.transport().is_closed(A), closed);
    assert!(app.events().contains(&AppEvent::Error {
        id: A,
        kind: "application",
    }));
}

#[rstest]
fn disconnect_releases_subscriptions(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture.driver.open(B, "/chat", Some("localhost"));
    fixture.driver.feed(B, wire::envelope(&json!([5, "t"])));
    fixture.driver.disconnect(B);
    fixture.driver.transport_mut().clear();

    fixture.driver.feed(A, wire::envelope(&json!([7, "t", 1])));
    assert!(fixture.driver.transport().bytes_to(B).is_empty());
    assert!(fixture.app.events().contains(&AppEvent::Close(B)));
}

#[rstest]
fn transport_failure_closes_and_notifies(mut fixture: Fixture) {
    fixture.driver.open(A, "/chat", Some("localhost"));
    fixture
        .driver
        .fail(A, std::io::Error::from(std::io::ErrorKind::ConnectionReset));

    assert!(fixture.driver.transport().is_closed(A));
    let events = fixture.app.events();
    assert!(events.contains(&AppEvent::Error {
        id: A,
        kind: "transport",
    }));
    assert_eq!(events.last(), Some(&AppEvent::Close(A)));
}

#[test]
fn transport_failure_closes_even_when_the_application_would_continue() {
    let app = ScriptedApp::new().on_error_action(ErrorAction::Continue);
    let mut driver = build(&app);
    driver.open(A, "/chat", Some("localhost"));
    driver.fail(A, std::io::Error::from(std::io::ErrorKind::BrokenPipe));

    assert!(driver.transport().is_closed(A));
    let events = app.events();
    assert!(events.contains(&AppEvent::Error {
        id: A,
        kind: "transport",
    }));
    assert_eq!(events.last(), Some(&AppEvent::Close(A)));
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_change_the_outcome(splits in proptest::collection::vec(1usize..40, 1..12)) {
        let mut bytes = wire::handshake("/chat", Some("localhost")).to_vec();
        bytes.extend_from_slice(&wire::envelope(&json!([2, "c1", "http://x/p#echo", "a"])));
        bytes.extend_from_slice(&wire::envelope(&json!([5, "t"])));

        let app = ScriptedApp::new();
        let mut driver = build(&app);
        driver.connect(A);
        let mut rest = &bytes[..];
        for split in splits.into_iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (chunk, tail) = rest.split_at(split.min(rest.len()));
            driver.feed(A, chunk.to_vec());
            rest = tail;
        }

        let envelopes = driver.envelopes(A);
        prop_assert_eq!(envelopes.len(), 2);
        prop_assert_eq!(&envelopes[1], &json!([3, "c1", ["a"]]));
        prop_assert_eq!(app.events().len(), 3);
        prop_assert!(!driver.transport().is_closed(A));
    }
}
