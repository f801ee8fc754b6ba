use super::{CONNACK_ACCEPTED, TICKS_PER_SECOND, client, establish, options, settle, start_connect};
use crate::mock::{BROKER, MockClock, MockResolver, MockStack};
use coopmqtt::network::Resolution;
use coopmqtt::network::application::mqtt::{Client, Options, Phase, QoS, Will};
use coopmqtt::network::error::{Error, ResponseCode};
use std::cell::RefCell;
use std::rc::Rc;

const PINGREQ: &[u8] = &[0xC0, 0x00];
const PINGRESP: &[u8] = &[0xD0, 0x00];

type Received = Rc<RefCell<Vec<(String, Vec<u8>)>>>;

fn recording_client() -> (
    Client<MockStack, MockResolver, MockClock, impl FnMut(&str, &[u8])>,
    Received,
) {
    let received: Received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    let client = Client::with_handler(
        MockStack::new(),
        MockResolver::answering(Resolution::Resolved(BROKER)),
        MockClock::new(TICKS_PER_SECOND),
        move |topic: &str, payload: &[u8]| {
            sink.borrow_mut().push((topic.to_string(), payload.to_vec()));
        },
    );
    (client, received)
}

#[test]
fn test_end_to_end_publish_and_disconnect() {
    let mut client = client();
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    client.connect("dev1", "", "", None).unwrap();

    assert_eq!(client.task(), Phase::NameResolve);
    assert_eq!(client.task(), Phase::ConnectAck);
    client.stack_mut().feed(&CONNACK_ACCEPTED);
    assert_eq!(client.task(), Phase::Idle);
    assert!(client.is_connected());

    client
        .publish("topic/a", b"hi", QoS::AtMostOnce, false)
        .unwrap();
    assert_eq!(client.task(), Phase::Idle);

    client.disconnect().unwrap();
    assert_eq!(settle(&mut client, 10), Phase::Home);
    assert!(!client.is_connected());
    assert_eq!(client.release(), Ok(ResponseCode::Success));

    let stack = client.stack();
    assert_eq!(stack.opened, vec![(BROKER, 1883)]);
    assert_eq!(stack.frames.len(), 3);

    let connects = stack.frames_of(1);
    assert_eq!(connects.len(), 1);
    assert_eq!(
        connects[0],
        &[
            0x10, 18, 0x00, 0x06, b'M', b'Q', b'I', b's', b'd', b'p', 0x03, 0x02, 0x00, 120, 0x00,
            0x04, b'd', b'e', b'v', b'1',
        ]
    );

    let publishes = stack.frames_of(3);
    assert_eq!(publishes.len(), 1);
    assert_eq!(
        publishes[0],
        &[0x30, 11, 0x00, 0x07, b't', b'o', b'p', b'i', b'c', b'/', b'a', b'h', b'i']
    );

    assert_eq!(stack.frames[2], vec![0xE0, 0x00]);
    assert_eq!(stack.disconnects, 1);
    assert_eq!(stack.closes, 1);
}

#[test]
fn test_connack_codes_map_to_response_codes() {
    let expected = [
        (0, true, ResponseCode::Success),
        (1, false, ResponseCode::BadProtocol),
        (2, false, ResponseCode::IdentifierRejected),
        (3, false, ResponseCode::ServerUnavailable),
        (4, false, ResponseCode::BadCredentials),
        (5, false, ResponseCode::NotAuthorized),
        (9, false, ResponseCode::ProtocolError),
    ];
    for (code, connected, response) in expected {
        let mut client = client();
        start_connect(&mut client, options());
        client.stack_mut().feed(&[0x20, 0x02, 0x00, code]);

        assert_eq!(client.task(), Phase::Idle, "CONNACK {code}");
        assert_eq!(client.is_connected(), connected, "CONNACK {code}");
        assert_eq!(client.response_code(), response, "CONNACK {code}");
    }
}

#[test]
fn test_refused_session_rejects_verbs() {
    let mut client = client();
    start_connect(&mut client, options());
    client.stack_mut().feed(&[0x20, 0x02, 0x00, 0x04]);
    client.task();

    assert_eq!(
        client.publish("t", b"x", QoS::AtMostOnce, false),
        Err(Error::NotConnected)
    );
    assert_eq!(client.response_code(), ResponseCode::OperationFailed);
    assert_eq!(client.connect("dev1", "", "", None), Err(Error::Busy));
}

#[test]
fn test_frames_before_connack_are_ignored() {
    let mut client = client();
    start_connect(&mut client, options());
    client.stack_mut().feed(PINGRESP);
    assert_eq!(client.task(), Phase::ConnectAck);
    client.stack_mut().feed(&CONNACK_ACCEPTED);
    assert_eq!(client.task(), Phase::Idle);
    assert!(client.is_connected());
}

#[test]
fn test_connect_encodes_will_and_credentials() {
    let mut client = client();
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    let will = Will {
        topic: "s",
        message: b"off",
        qos: QoS::AtLeastOnce,
        retain: false,
    };
    client.connect("d", "u", "p", Some(&will)).unwrap();
    settle(&mut client, 5);

    let connect = client.stack().frames_of(1)[0].to_vec();
    // flags sit after the 2+6 byte protocol name and the level byte
    assert_eq!(connect[11], 0x80 | 0x40 | 0x08 | 0x04 | 0x02);
    assert_eq!(
        &connect[14..],
        &[
            0x00, 0x01, b'd', 0x00, 0x01, b's', 0x00, 0x03, b'o', b'f', b'f', 0x00, 0x01, b'u',
            0x00, 0x01, b'p',
        ]
    );
}

#[test]
fn test_password_without_username_is_not_sent() {
    let mut client = client();
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    client.connect("dev1", "", "secret", None).unwrap();
    settle(&mut client, 5);

    let connect = client.stack().frames_of(1)[0].to_vec();
    assert_eq!(connect[11], 0x02);
    assert_eq!(connect.len(), 20);
}

#[test]
fn test_resolution_timeout_never_opens_transport() {
    let mut client = client();
    client.resolver_mut().answer = Resolution::Pending;
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    client.connect("dev1", "", "", None).unwrap();

    assert_eq!(client.task(), Phase::NameResolve);
    client.clock().advance(30);
    assert_eq!(client.task(), Phase::NameResolve);
    client.clock().advance(31);
    assert_eq!(client.task(), Phase::Home);

    assert_eq!(client.response_code(), ResponseCode::ResolveError);
    assert!(client.stack().opened.is_empty());
    assert_eq!(client.resolver().ended, 1);
    assert!(!client.resolver().in_use);
}

#[test]
fn test_resolution_failure_returns_home() {
    let mut client = client();
    client.resolver_mut().answer = Resolution::Failed;
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    client.connect("dev1", "", "", None).unwrap();

    assert_eq!(settle(&mut client, 5), Phase::Home);
    assert_eq!(client.response_code(), ResponseCode::ResolveError);
    assert!(client.stack().opened.is_empty());
}

#[test]
fn test_missing_server_fails_immediately() {
    let mut client = client();
    client.acquire().unwrap();
    client.connect("dev1", "", "", None).unwrap();
    assert_eq!(client.task(), Phase::Home);
    assert_eq!(client.response_code(), ResponseCode::ResolveError);
    assert!(client.resolver().queries.is_empty());
}

#[test]
fn test_busy_resolver_counts_against_retry_limit() {
    let mut client = client();
    client.resolver_mut().busy = true;
    client.acquire().unwrap();
    client
        .configure(Options {
            retry_limit: 2,
            ..options()
        })
        .unwrap();
    client.connect("dev1", "", "", None).unwrap();

    assert_eq!(client.task(), Phase::Begin);
    assert_eq!(client.task(), Phase::Begin);
    assert_eq!(client.task(), Phase::Home);
    assert_eq!(client.response_code(), ResponseCode::ResolveError);
    assert_eq!(client.resolver().ended, 0);
}

#[test]
fn test_dotted_address_skips_resolver() {
    let mut client = client();
    client.acquire().unwrap();
    client
        .configure(Options {
            port: Some(1884),
            ..Options::with_server("10.0.0.2").unwrap()
        })
        .unwrap();
    client.connect("dev1", "", "", None).unwrap();

    assert_eq!(client.task(), Phase::ConnectAck);
    assert!(client.resolver().queries.is_empty());
    assert_eq!(client.stack().opened, vec![(BROKER, 1884)]);
}

#[test]
fn test_transport_handshake_timeout() {
    let mut client = client();
    client.stack_mut().handshake_done = false;
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    client.connect("dev1", "", "", None).unwrap();

    client.task();
    assert_eq!(client.task(), Phase::TransportObtained);
    client.clock().advance(81);
    assert_eq!(client.task(), Phase::Close);
    assert_eq!(settle(&mut client, 5), Phase::Home);

    assert_eq!(client.response_code(), ResponseCode::ConnectError);
    assert!(client.stack().frames.is_empty());
    assert_eq!(client.stack().closes, 1);
}

#[test]
fn test_exhausted_socket_pool_is_retried_then_abandoned() {
    let mut client = client();
    client.stack_mut().pool_empty = true;
    client.acquire().unwrap();
    client
        .configure(Options {
            retry_limit: 3,
            ..options()
        })
        .unwrap();
    client.connect("dev1", "", "", None).unwrap();

    client.task();
    for _ in 0..3 {
        assert_eq!(client.task(), Phase::ObtainTransport);
    }
    assert_eq!(client.task(), Phase::Home);
    assert_eq!(client.response_code(), ResponseCode::ConnectError);
    assert_eq!(client.stack().opened.len(), 4);
}

#[test]
fn test_unanswered_connect_times_out() {
    let mut client = client();
    start_connect(
        &mut client,
        Options {
            retry_limit: 3,
            ..options()
        },
    );

    for _ in 0..3 {
        assert_eq!(client.task(), Phase::ConnectAck);
    }
    assert_eq!(client.task(), Phase::Home);
    assert_eq!(client.response_code(), ResponseCode::Timeout);
    assert!(!client.is_connected());
    assert_eq!(client.stack().closes, 1);
}

#[test]
fn test_keepalive_never_stacks_pings() {
    let mut client = client();
    establish(
        &mut client,
        Options {
            keep_alive_seconds: 1,
            ..options()
        },
    );

    client.clock().advance(TICKS_PER_SECOND);
    assert_eq!(client.task(), Phase::Ping);
    assert_eq!(client.task(), Phase::Idle);
    assert!(client.ping_outstanding());
    assert_eq!(client.stack().frames_of(12), vec![PINGREQ]);

    for _ in 0..5 {
        client.clock().advance(TICKS_PER_SECOND);
        assert_eq!(client.task(), Phase::Idle);
    }
    assert_eq!(client.ping(), Err(Error::PingOutstanding));
    assert_eq!(client.stack().frames_of(12).len(), 1);

    client.stack_mut().feed(PINGRESP);
    client.task();
    assert!(!client.ping_outstanding());

    client.clock().advance(TICKS_PER_SECOND);
    assert_eq!(client.task(), Phase::Ping);
    client.task();
    assert_eq!(client.stack().frames_of(12).len(), 2);
}

#[test]
fn test_zero_keepalive_disables_pings() {
    let mut client = client();
    establish(
        &mut client,
        Options {
            keep_alive_seconds: 0,
            ..options()
        },
    );
    for _ in 0..10 {
        client.clock().advance(1_000);
        assert_eq!(client.task(), Phase::Idle);
    }
    assert!(client.stack().frames_of(12).is_empty());
}

#[test]
fn test_manual_ping_and_broker_ping() {
    let mut client = client();
    establish(&mut client, options());

    client.ping().unwrap();
    assert_eq!(client.task(), Phase::Idle);
    assert!(client.ping_outstanding());

    client.stack_mut().feed(PINGREQ);
    assert_eq!(client.task(), Phase::PingAck);
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(client.stack().frames_of(13), vec![PINGRESP]);
    assert!(client.ping_outstanding());
}

#[test]
fn test_inbound_qos1_publish_is_acknowledged_once() {
    let (mut client, received) = recording_client();
    establish(&mut client, options());

    let frame = [
        0x32, 0x0A, 0x00, 0x03, b'a', b'/', b'b', 0x12, 0x34, b'x', b'y', b'z',
    ];
    client.stack_mut().feed(&frame);
    assert_eq!(client.task(), Phase::PubAck);
    assert_eq!(client.task(), Phase::Idle);
    for _ in 0..5 {
        client.task();
    }

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "a/b");
    assert_eq!(received[0].1, b"xyz");
    // frame minus header, length digit, topic length field, topic and id
    assert_eq!(received[0].1.len(), frame.len() - 1 - 1 - 2 - 3 - 2);

    assert_eq!(
        client.stack().frames_of(4),
        vec![&[0x40, 0x02, 0x12, 0x34][..]]
    );
}

#[test]
fn test_inbound_qos0_publish_is_not_acknowledged() {
    let (mut client, received) = recording_client();
    establish(&mut client, options());

    client
        .stack_mut()
        .feed(&[0x30, 0x05, 0x00, 0x01, b't', b'o', b'k']);
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(received.borrow()[0], ("t".to_string(), b"ok".to_vec()));
    assert!(client.stack().frames_of(4).is_empty());
}

#[test]
fn test_oversized_inbound_frame_is_dropped() {
    let (mut client, received) = recording_client();
    establish(&mut client, options());

    let mut oversized = vec![0x30, 0xAF, 0x02, 0x00, 0x01, b'b'];
    oversized.extend(std::iter::repeat_n(0x55, 300));
    assert_eq!(oversized.len(), 3 + 303);
    client.stack_mut().feed(&oversized);
    client
        .stack_mut()
        .feed(&[0x30, 0x04, 0x00, 0x01, b's', b'!']);

    for _ in 0..3 {
        client.task();
    }
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], ("s".to_string(), b"!".to_vec()));
    assert!(client.is_connected());
}

#[test]
fn test_malformed_length_closes_connection() {
    let mut client = client();
    establish(&mut client, options());

    client
        .stack_mut()
        .feed(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
    assert_eq!(client.task(), Phase::Close);
    assert_eq!(settle(&mut client, 5), Phase::Home);
    assert_eq!(client.response_code(), ResponseCode::ProtocolError);
}

#[test]
fn test_qos1_publish_waits_for_ack() {
    let mut client = client();
    establish(&mut client, options());

    client
        .publish("t/1", b"v", QoS::AtLeastOnce, true)
        .unwrap();
    assert_eq!(client.message_id(), 1);
    assert_eq!(client.next_message_id(), 2);
    assert_eq!(client.task(), Phase::PublishAck);
    assert_eq!(
        client.stack().frames_of(3),
        vec![&[0x33, 0x08, 0x00, 0x03, b't', b'/', b'1', 0x00, 0x01, b'v'][..]]
    );
    assert_eq!(client.task(), Phase::PublishAck);

    client.stack_mut().feed(&[0x40, 0x02, 0x00, 0x01]);
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(client.response_code(), ResponseCode::Success);
}

#[test]
fn test_publish_arriving_during_ack_wait_is_acknowledged_later() {
    let (mut client, received) = recording_client();
    establish(&mut client, options());

    client.publish("out", b"1", QoS::AtLeastOnce, false).unwrap();
    assert_eq!(client.task(), Phase::PublishAck);

    client
        .stack_mut()
        .feed(&[0x32, 0x06, 0x00, 0x01, b'i', 0x00, 0x05, b'2']);
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(received.borrow().len(), 1);

    assert_eq!(client.task(), Phase::PubAck);
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(
        client.stack().frames_of(4),
        vec![&[0x40, 0x02, 0x00, 0x05][..]]
    );
}

#[test]
fn test_subscribe_and_unsubscribe_round_trip() {
    let mut client = client();
    establish(&mut client, options());

    client.subscribe("cmd/#", QoS::AtLeastOnce).unwrap();
    assert_eq!(client.task(), Phase::SubscribeAck);
    assert_eq!(
        client.stack().frames_of(8),
        vec![&[0x82, 0x0A, 0x00, 0x01, 0x00, 0x05, b'c', b'm', b'd', b'/', b'#', 0x01][..]]
    );
    client.stack_mut().feed(&[0x90, 0x03, 0x00, 0x01, 0x01]);
    assert_eq!(client.task(), Phase::Idle);

    client.unsubscribe("cmd/#").unwrap();
    assert_eq!(client.task(), Phase::UnsubscribeAck);
    assert_eq!(
        client.stack().frames_of(10),
        vec![&[0xA2, 0x09, 0x00, 0x02, 0x00, 0x05, b'c', b'm', b'd', b'/', b'#'][..]]
    );
    client.stack_mut().feed(&[0xB0, 0x02, 0x00, 0x02]);
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(client.next_message_id(), 3);
}

#[test]
fn test_full_transmit_buffer_defers_whole_frame() {
    let mut client = client();
    establish(&mut client, options());
    let frames_before = client.stack().frames.len();

    client.stack_mut().capacity = 4;
    client.publish("topic/a", b"hi", QoS::AtMostOnce, false).unwrap();
    assert_eq!(client.task(), Phase::Publish);
    assert_eq!(client.stack().frames.len(), frames_before);

    client.stack_mut().capacity = 1024;
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(client.stack().frames.len(), frames_before + 1);
    assert_eq!(client.stack().frames_of(3)[0].len(), 13);
}

#[test]
fn test_transport_loss_is_detected_in_idle() {
    let mut client = client();
    establish(&mut client, options());

    client.stack_mut().handshake_done = false;
    assert_eq!(client.task(), Phase::Close);
    assert_eq!(settle(&mut client, 5), Phase::Home);
    assert!(!client.is_connected());
    assert_eq!(client.response_code(), ResponseCode::ConnectError);
    assert_eq!(client.stack().closes, 1);
}

#[test]
fn test_verb_preconditions() {
    let mut client = client();
    assert_eq!(
        client.publish("t", b"x", QoS::AtMostOnce, false),
        Err(Error::NotAcquired)
    );

    client.acquire().unwrap();
    assert_eq!(client.subscribe("t", QoS::AtMostOnce), Err(Error::NotConnected));
    assert_eq!(client.response_code(), ResponseCode::OperationFailed);

    client.configure(options()).unwrap();
    client.connect("dev1", "", "", None).unwrap();
    assert_eq!(client.unsubscribe("t"), Err(Error::Busy));
    assert_eq!(client.configure(options()), Err(Error::Busy));
    client.task();
    client.task();
    client.stack_mut().feed(&CONNACK_ACCEPTED);
    client.task();

    assert_eq!(
        client.publish("t", b"x", QoS::ExactlyOnce, false),
        Err(Error::UnsupportedQos)
    );
    assert_eq!(client.subscribe("t", QoS::ExactlyOnce), Err(Error::UnsupportedQos));
    assert_eq!(client.puback(0), Err(Error::InvalidMessageId));
    assert_eq!(
        client.publish("t", &[0; 300], QoS::AtMostOnce, false),
        Err(Error::BufferOverflow)
    );
    assert_eq!(client.phase(), Phase::Idle);
}

#[test]
fn test_explicit_puback() {
    let mut client = client();
    establish(&mut client, options());
    client.puback(0x0102).unwrap();
    assert_eq!(client.task(), Phase::Idle);
    assert_eq!(
        client.stack().frames_of(4),
        vec![&[0x40, 0x02, 0x01, 0x02][..]]
    );
}
