//! Connection-scoped frames: SETTINGS, PING, GOAWAY, shutdown.

mod support;

use std::thread;
use std::time::{Duration, Instant};

use http::{HeaderMap, Method};

use aether_h2::frame::{Head, Kind, Settings};
use aether_h2::{HeaderBlock, Pseudo, Reason, UserError};
use support::*;

fn get_request() -> HeaderBlock {
    HeaderBlock::new(
        Pseudo::request(Method::GET, "https", "example.com", "/"),
        HeaderMap::new(),
    )
}

#[test]
fn ping_is_answered_with_matching_ack() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let payload = *b"opaque!!";
    feed(&conn, ping_frame(0, payload)).unwrap();

    let frames = mux.take();
    assert_eq!(frames.len(), 1);
    let (head, echoed) = &frames[0];
    assert_eq!(head.kind(), Kind::Ping);
    assert_eq!(head.flag() & ACK, ACK);
    assert_eq!(&echoed[..], &payload);
}

#[test]
fn write_ping_completes_on_ack() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let payload = *b"12345678";
    let pinger = conn.clone();
    let handle = thread::spawn(move || pinger.write_ping(payload, None));

    mux.wait_for_frames(1);
    let frames = mux.take();
    assert_eq!(frames[0].0.kind(), Kind::Ping);
    assert_eq!(&frames[0].1[..], &payload);

    feed(&conn, ping_frame(ACK, payload)).unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn write_ping_times_out_without_ack() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let deadline = Instant::now() + Duration::from_millis(20);
    let err = conn.write_ping(*b"noanswer", Some(deadline)).unwrap_err();
    assert!(err.is_timeout());

    // The slot was released; the same payload may be pinged again.
    let deadline = Instant::now() + Duration::from_millis(20);
    let err = conn.write_ping(*b"noanswer", Some(deadline)).unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn duplicate_ping_payload_is_rejected_while_pending() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let payload = *b"pending!";
    let pinger = conn.clone();
    let handle = thread::spawn(move || pinger.write_ping(payload, None));
    mux.wait_for_frames(1);

    let err = conn
        .write_ping(payload, Some(Instant::now()))
        .unwrap_err();
    assert_eq!(err.user_error(), Some(UserError::SendPingWhilePending));

    feed(&conn, ping_frame(ACK, payload)).unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn short_ping_payload_is_fatal() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let err = feed(
        &conn,
        (
            Head::new(Kind::Ping, 0, 0.into()),
            bytes::Bytes::from_static(&[0; 7]),
        ),
    )
    .unwrap_err();
    assert_eq!(err.reason(), Some(Reason::FRAME_SIZE_ERROR));
}

#[test]
fn settings_are_acked_after_apply() {
    let mux = MockMux::new();
    let conn = client(&mux);

    feed(&conn, settings_frame(&[(3, 100), (5, 20_000)])).unwrap();

    let frames = mux.take();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.kind(), Kind::Settings);
    assert_eq!(frames[0].0.flag() & ACK, ACK);
    assert!(frames[0].1.is_empty());
}

#[test]
fn client_rejects_enable_push_from_server() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let err = feed(&conn, settings_frame(&[(2, 1)])).unwrap_err();
    assert_eq!(err.reason(), Some(Reason::PROTOCOL_ERROR));
}

#[test]
fn max_frame_size_floor_is_strict() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let err = feed(&conn, settings_frame(&[(5, 16_383)])).unwrap_err();
    assert_eq!(err.reason(), Some(Reason::PROTOCOL_ERROR));

    let mux = MockMux::new();
    let conn = client(&mux);
    feed(&conn, settings_frame(&[(5, 16_384)])).unwrap();
    assert!(conn.close_reason().is_none());
}

#[test]
fn only_one_settings_frame_may_await_ack() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let mut settings = Settings::default();
    settings.set_initial_window_size(Some(1024));
    conn.write_settings(settings.clone()).unwrap();

    let err = conn.write_settings(settings.clone()).unwrap_err();
    assert_eq!(
        err.user_error(),
        Some(UserError::SendSettingsWhilePending)
    );

    feed(&conn, settings_ack_frame()).unwrap();
    conn.write_settings(settings).unwrap();
}

#[test]
fn goaway_bounds_new_streams() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let stream = conn.new_stream().unwrap();
    stream.write_headers(get_request(), false).unwrap();

    feed(
        &conn,
        goaway_frame(1, u32::from(Reason::ENHANCE_YOUR_CALM)),
    )
    .unwrap();
    assert_eq!(conn.goaway_horizon(), Some(1.into()));

    // The in-flight stream continues...
    feed(&conn, headers_frame(1, END_HEADERS, &[(":status", "200")])).unwrap();
    assert!(stream.get_headers(None).unwrap().is_some());

    // ...but nothing new may be opened beyond the horizon.
    let late = conn.new_stream().unwrap();
    let err = late.write_headers(get_request(), false).unwrap_err();
    assert_eq!(err.user_error(), Some(UserError::Rejected));
}

#[test]
fn close_emits_goaway_and_poisons_streams() {
    let mux = MockMux::new();
    let conn = client(&mux);

    let stream = conn.new_stream().unwrap();
    stream.write_headers(get_request(), false).unwrap();
    mux.take();

    conn.close(Reason::NO_ERROR).unwrap();

    let frames = mux.take();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0.kind(), Kind::GoAway);

    assert_eq!(conn.close_reason(), Some(Reason::NO_ERROR));
    assert!(stream.get_headers(None).is_err());
    assert!(conn.accept(None).is_err());
}

#[test]
fn accept_times_out() {
    let mux = MockMux::new();
    let server = server(&mux);

    let deadline = Instant::now() + Duration::from_millis(20);
    let err = server.accept(Some(deadline)).unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn idle_hook_fires_when_the_last_stream_closes() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let mux = MockMux::new();
    let server = server(&mux);

    let fired = Arc::new(AtomicUsize::new(0));
    let observer = fired.clone();
    server.set_idle_hook(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    });

    feed(
        &server,
        headers_frame(1, END_HEADERS | END_STREAM, &request_fields()),
    )
    .unwrap();
    let stream = server.accept(None).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    let response = HeaderBlock::new(
        Pseudo::response(http::StatusCode::OK),
        HeaderMap::new(),
    );
    stream.write_headers(response, true).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_frame_types_are_ignored() {
    let mux = MockMux::new();
    let conn = client(&mux);

    feed(
        &conn,
        (
            Head::new(Kind::Unknown, 0xff, 1.into()),
            bytes::Bytes::from_static(b"whatever"),
        ),
    )
    .unwrap();
    assert!(conn.close_reason().is_none());
}

#[test]
fn frames_on_a_closed_connection_are_dropped() {
    let mux = MockMux::new();
    let conn = client(&mux);

    conn.close(Reason::NO_ERROR).unwrap();
    mux.take();

    feed(&conn, ping_frame(0, *b"ignored!")).unwrap();
    assert_eq!(mux.frame_count(), 0);
}
