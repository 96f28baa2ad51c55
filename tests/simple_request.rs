//! End-to-end exchanges between a client core and a server core, wired
//! through recording multiplexers.

mod support;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use aether_h2::frame::{Head, Kind, DEFAULT_INITIAL_WINDOW_SIZE};
use aether_h2::{HeaderBlock, Pseudo};
use support::*;

fn get_request() -> HeaderBlock {
    HeaderBlock::new(
        Pseudo::request(Method::GET, "https", "example.com", "/"),
        HeaderMap::new(),
    )
}

#[test]
fn simple_request() {
    let client_mux = MockMux::new();
    let server_mux = MockMux::new();
    let client = client(&client_mux);
    let server = server(&server_mux);

    // Client opens stream 1 and sends the request, END_STREAM set.
    let req_stream = client.new_stream().unwrap();
    assert_eq!(u32::from(req_stream.id()), 1);
    req_stream.write_headers(get_request(), true).unwrap();

    pump(&client_mux, &server);

    // Server sees the stream, reads the request.
    let accepted = server.accept(None).unwrap();
    assert_eq!(accepted.id(), req_stream.id());

    let request = accepted.get_headers(None).unwrap().unwrap();
    assert_eq!(request.pseudo.method, Some(Method::GET));
    assert_eq!(request.pseudo.authority.as_deref(), Some("example.com"));

    // Request carried END_STREAM: the body is empty.
    assert_eq!(accepted.get_next_chunk(None).unwrap(), None);

    // Server responds: 200, then "hello" with END_STREAM.
    let response = HeaderBlock::new(Pseudo::response(StatusCode::OK), HeaderMap::new());
    accepted.write_headers(response, false).unwrap();
    accepted
        .write_chunk(Bytes::from_static(b"hello"), true, None)
        .unwrap();

    pump(&server_mux, &client);

    let response = req_stream.get_headers(None).unwrap().unwrap();
    assert_eq!(response.pseudo.status, Some(StatusCode::OK));

    let chunk = req_stream.get_next_chunk(None).unwrap().unwrap();
    assert_eq!(&chunk[..], b"hello");
    assert_eq!(req_stream.get_next_chunk(None).unwrap(), None);

    // The client sent no DATA; its send credit is untouched.
    assert_eq!(client.peer_flow_credits(), DEFAULT_INITIAL_WINDOW_SIZE);

    // The server spent five octets of both stream and connection credit.
    assert_eq!(server.peer_flow_credits(), DEFAULT_INITIAL_WINDOW_SIZE - 5);
    assert_eq!(
        accepted.peer_flow_credits().unwrap(),
        DEFAULT_INITIAL_WINDOW_SIZE - 5
    );

    // Both ends have fully closed the stream.
    assert!(!client.has_active_streams());
    assert!(!server.has_active_streams());

    let stats = accepted.stats().unwrap();
    assert_eq!(stats.headers_recv, 1);
    assert_eq!(stats.headers_sent, 1);
    assert_eq!(stats.bytes_sent, 5);
}

#[test]
fn padded_data_acks_on_wire_length() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let stream = client.new_stream().unwrap();
    stream.write_headers(get_request(), true).unwrap();
    client_mux.take();

    // Response headers, then DATA with pad-length 3: payload "hi" plus
    // three zero octets, six octets on the wire.
    feed(&client, headers_frame(1, END_HEADERS, &[(":status", "200")])).unwrap();
    feed(
        &client,
        data_frame(1, END_STREAM | PADDED, &[3, b'h', b'i', 0, 0, 0]),
    )
    .unwrap();

    stream.get_headers(None).unwrap().unwrap();

    let chunk = stream.get_next_chunk(None).unwrap().unwrap();
    assert_eq!(&chunk[..], b"hi");

    // The ack credits the full on-wire length on stream and connection.
    let frames = client_mux.take();
    let updates: Vec<_> = frames
        .iter()
        .filter(|(head, _)| head.kind() == Kind::WindowUpdate)
        .collect();
    assert_eq!(updates.len(), 2);
    assert_eq!(u32::from(updates[0].0.stream_id()), 1);
    assert_eq!(&updates[0].1[..], &6u32.to_be_bytes());
    assert_eq!(u32::from(updates[1].0.stream_id()), 0);
    assert_eq!(&updates[1].1[..], &6u32.to_be_bytes());

    assert_eq!(stream.get_next_chunk(None).unwrap(), None);
}

#[test]
fn fragmented_header_block_reassembles() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let stream = client.new_stream().unwrap();
    stream.write_headers(get_request(), true).unwrap();
    client_mux.take();

    // :status 200 split between HEADERS (no END_HEADERS) and one
    // CONTINUATION carrying the rest of the block.
    let block = plain_block(&[(":status", "200"), ("server", "aether")]);
    let (first, rest) = (block.slice(..7), block.slice(7..));

    feed(&client, (Head::new(Kind::Headers, 0, 1.into()), first)).unwrap();
    feed(
        &client,
        (Head::new(Kind::Continuation, END_HEADERS, 1.into()), rest),
    )
    .unwrap();

    let response = stream.get_headers(None).unwrap().unwrap();
    assert_eq!(response.pseudo.status, Some(StatusCode::OK));
    assert_eq!(response.fields["server"], "aether");
}

#[test]
fn interleaved_frame_during_assembly_is_a_connection_error() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let stream = client.new_stream().unwrap();
    stream.write_headers(get_request(), true).unwrap();
    client_mux.take();

    let block = plain_block(&[(":status", "200")]);
    feed(&client, (Head::new(Kind::Headers, 0, 1.into()), block)).unwrap();

    // Any frame other than CONTINUATION on the same stream kills the
    // connection.
    let err = feed(&client, data_frame(1, 0, b"x")).unwrap_err();
    assert_eq!(err.reason(), Some(aether_h2::Reason::PROTOCOL_ERROR));

    // A GOAWAY went out.
    let frames = client_mux.take();
    assert!(frames.iter().any(|(head, _)| head.kind() == Kind::GoAway));
}

#[test]
fn continuation_without_open_block_is_a_connection_error() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let err = feed(
        &client,
        (
            Head::new(Kind::Continuation, END_HEADERS, 1.into()),
            plain_block(&[("x", "y")]),
        ),
    )
    .unwrap_err();
    assert_eq!(err.reason(), Some(aether_h2::Reason::PROTOCOL_ERROR));
}

#[test]
fn trailers_follow_data() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let stream = client.new_stream().unwrap();
    stream.write_headers(get_request(), true).unwrap();

    feed(&client, headers_frame(1, END_HEADERS, &[(":status", "200")])).unwrap();
    feed(&client, data_frame(1, 0, b"body")).unwrap();
    feed(
        &client,
        headers_frame(1, END_HEADERS | END_STREAM, &[("grpc-status", "0")]),
    )
    .unwrap();

    let response = stream.get_headers(None).unwrap().unwrap();
    assert_eq!(response.pseudo.status, Some(StatusCode::OK));

    let chunk = stream.get_next_chunk(None).unwrap().unwrap();
    assert_eq!(&chunk[..], b"body");
    assert_eq!(stream.get_next_chunk(None).unwrap(), None);

    let trailers = stream.get_headers(None).unwrap().unwrap();
    assert!(trailers.pseudo.is_empty());
    assert_eq!(trailers.fields["grpc-status"], "0");
}

#[test]
fn third_header_block_resets_the_stream() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let stream = client.new_stream().unwrap();
    stream.write_headers(get_request(), false).unwrap();
    client_mux.take();

    feed(&client, headers_frame(1, END_HEADERS, &[(":status", "200")])).unwrap();
    feed(
        &client,
        headers_frame(1, END_HEADERS | END_STREAM, &[("grpc-status", "0")]),
    )
    .unwrap();

    // A third block on the same stream is answered with RST_STREAM, and
    // the connection survives.
    feed(
        &client,
        headers_frame(1, END_HEADERS | END_STREAM, &[("more", "trailers")]),
    )
    .unwrap();

    let frames = client_mux.take();
    let resets: Vec<_> = frames
        .iter()
        .filter(|(head, _)| head.kind() == Kind::Reset)
        .collect();
    assert_eq!(resets.len(), 1);
    assert!(client.close_reason().is_none());

    assert!(stream.get_headers(None).is_ok());
}

#[test]
fn unget_replays_bytes_without_recrediting() {
    let client_mux = MockMux::new();
    let client = client(&client_mux);

    let stream = client.new_stream().unwrap();
    stream.write_headers(get_request(), true).unwrap();

    feed(&client, headers_frame(1, END_HEADERS, &[(":status", "200")])).unwrap();
    feed(&client, data_frame(1, END_STREAM, b"hello")).unwrap();

    stream.get_headers(None).unwrap().unwrap();
    let chunk = stream.get_next_chunk(None).unwrap().unwrap();
    assert_eq!(&chunk[..], b"hello");
    client_mux.take();

    // Push back the tail; re-reading it must not emit window updates.
    stream.unget(chunk.slice(3..)).unwrap();
    let replay = stream.get_next_chunk(None).unwrap().unwrap();
    assert_eq!(&replay[..], b"lo");
    assert_eq!(client_mux.frame_count(), 0);

    assert_eq!(stream.get_next_chunk(None).unwrap(), None);
}
