use super::{client, establish, options, start_connect};
use coopmqtt::network::Resolution;
use coopmqtt::network::application::mqtt::{Options, Phase, QoS};
use coopmqtt::network::error::{Error, ResponseCode};

#[test]
fn test_second_acquire_fails() {
    let mut client = client();
    assert!(!client.is_acquired());
    client.acquire().unwrap();
    assert!(client.is_acquired());
    assert_eq!(client.acquire(), Err(Error::SessionInUse));
    assert!(client.is_acquired());
}

#[test]
fn test_release_twice_fails() {
    let mut client = client();
    assert_eq!(client.release(), Err(Error::AlreadyReleased));
    client.acquire().unwrap();
    assert_eq!(client.release(), Ok(ResponseCode::Success));
    assert_eq!(client.release(), Err(Error::AlreadyReleased));
}

#[test]
fn test_verbs_require_acquired_session() {
    let mut client = client();
    assert_eq!(client.configure(options()), Err(Error::NotAcquired));
    assert_eq!(client.connect("dev1", "", "", None), Err(Error::NotAcquired));
    assert_eq!(client.subscribe("t", QoS::AtMostOnce), Err(Error::NotAcquired));
    assert_eq!(client.unsubscribe("t"), Err(Error::NotAcquired));
    assert_eq!(client.ping(), Err(Error::NotAcquired));
    assert_eq!(client.puback(1), Err(Error::NotAcquired));
    assert_eq!(client.disconnect(), Err(Error::NotAcquired));
    assert_eq!(client.task(), Phase::Home);
}

#[test]
fn test_release_during_resolution_frees_resolver() {
    let mut client = client();
    client.resolver_mut().answer = Resolution::Pending;
    client.acquire().unwrap();
    client.configure(options()).unwrap();
    client.connect("dev1", "", "", None).unwrap();
    assert_eq!(client.task(), Phase::NameResolve);
    assert!(client.resolver().in_use);

    client.release().unwrap();
    assert_eq!(client.phase(), Phase::Home);
    assert!(!client.resolver().in_use);
    assert_eq!(client.resolver().ended, 1);
    assert!(client.stack().opened.is_empty());
}

#[test]
fn test_release_while_waiting_for_connack_closes_socket() {
    let mut client = client();
    start_connect(&mut client, options());

    client.release().unwrap();
    assert_eq!(client.phase(), Phase::Home);
    assert_eq!(client.stack().frames_of(14).len(), 0);
    assert_eq!(client.stack().disconnects, 1);
    assert_eq!(client.stack().closes, 1);
}

#[test]
fn test_release_while_connected_says_goodbye() {
    let mut client = client();
    establish(&mut client, options());

    assert_eq!(client.release(), Ok(ResponseCode::Success));
    assert!(!client.is_connected());
    assert_eq!(client.phase(), Phase::Home);

    let stack = client.stack();
    assert_eq!(stack.frames.last().map(Vec::as_slice), Some(&[0xE0, 0x00][..]));
    assert_eq!(stack.disconnects, 1);
    assert_eq!(stack.closes, 1);
}

#[test]
fn test_release_reports_last_failure() {
    let mut client = client();
    client.acquire().unwrap();
    client.connect("dev1", "", "", None).unwrap();
    client.task();
    assert_eq!(client.release(), Ok(ResponseCode::ResolveError));
}

#[test]
fn test_reacquire_starts_fresh_session() {
    let mut client = client();
    establish(
        &mut client,
        Options {
            retry_limit: 7,
            ..options()
        },
    );
    client.subscribe("a", QoS::AtMostOnce).unwrap();
    client.task();
    client.stack_mut().feed(&[0x90, 0x03, 0x00, 0x01, 0x00]);
    client.task();
    assert_eq!(client.next_message_id(), 2);
    client.release().unwrap();

    client.acquire().unwrap();
    assert_eq!(client.phase(), Phase::Home);
    assert_eq!(client.next_message_id(), 1);
    assert_eq!(client.message_id(), 0);
    assert_eq!(client.response_code(), ResponseCode::Success);
    assert_eq!(client.options(), &Options::default());
    assert!(client.session().client_id().is_empty());
}
