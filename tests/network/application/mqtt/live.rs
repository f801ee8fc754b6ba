use dotenvy::dotenv;
use coopmqtt::network::application::mqtt::{Client, Options, Phase, QoS};
use coopmqtt::network::{Clock, Resolution, Resolver, TcpStack};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One nonblocking std socket behind the `TcpStack` interface
#[derive(Default)]
struct StdStack {
    stream: Option<TcpStream>,
    inbound: VecDeque<u8>,
    broken: bool,
}

impl StdStack {
    fn fill(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut chunk = [0; 512];
        match stream.read(&mut chunk) {
            Ok(0) => self.broken = true,
            Ok(n) => self.inbound.extend(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(_) => self.broken = true,
        }
    }
}

impl TcpStack for StdStack {
    type Socket = u8;

    fn open(&mut self, address: Ipv4Addr, port: u16) -> Option<u8> {
        let stream =
            TcpStream::connect_timeout(&SocketAddr::from((address, port)), Duration::from_secs(5))
                .ok()?;
        stream.set_nonblocking(true).ok()?;
        self.stream = Some(stream);
        self.broken = false;
        Some(0)
    }

    fn is_connected(&mut self, _socket: u8) -> bool {
        self.stream.is_some() && !self.broken
    }

    fn write_capacity(&mut self, _socket: u8) -> usize {
        4096
    }

    fn write(&mut self, _socket: u8, bytes: &[u8]) -> usize {
        let Some(stream) = self.stream.as_mut() else {
            return 0;
        };
        stream.set_nonblocking(false).ok();
        let written = stream.write_all(bytes).map(|_| bytes.len()).unwrap_or(0);
        stream.set_nonblocking(true).ok();
        written
    }

    fn flush(&mut self, _socket: u8) {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().ok();
        }
    }

    fn read_available(&mut self, _socket: u8) -> usize {
        self.fill();
        self.inbound.len()
    }

    fn read_byte(&mut self, _socket: u8) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn disconnect(&mut self, _socket: u8) {
        if let Some(stream) = self.stream.as_ref() {
            stream.shutdown(std::net::Shutdown::Both).ok();
        }
    }

    fn close(&mut self, _socket: u8) {
        self.stream = None;
        self.inbound.clear();
    }
}

/// Resolves through the operating system, blocking once on `resolve`
#[derive(Default)]
struct StdResolver {
    answer: Option<Resolution>,
}

impl Resolver for StdResolver {
    fn begin_usage(&mut self) -> bool {
        true
    }

    fn resolve(&mut self, hostname: &str) {
        let address = (hostname, 0).to_socket_addrs().ok().and_then(|mut addrs| {
            addrs.find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
        });
        self.answer = Some(address.map_or(Resolution::Failed, Resolution::Resolved));
    }

    fn poll(&mut self) -> Resolution {
        self.answer.unwrap_or(Resolution::Pending)
    }

    fn end_usage(&mut self) {
        self.answer = None;
    }
}

/// Millisecond ticks since the test started
struct StdClock(Instant);

impl Clock for StdClock {
    fn now(&self) -> u32 {
        self.0.elapsed().as_millis() as u32
    }

    fn ticks_per_second(&self) -> u32 {
        1000
    }
}

fn broker() -> (String, u16) {
    dotenv().ok();
    let address = env::var("TEST_MQTT_ADDRESS").unwrap_or("test.mosquitto.org:1883".to_string());
    let (host, port) = address.rsplit_once(':').unwrap_or((address.as_str(), "1883"));
    (host.to_string(), port.parse().unwrap())
}

fn run_until<H>(
    client: &mut Client<StdStack, StdResolver, StdClock, H>,
    done: impl Fn(&Client<StdStack, StdResolver, StdClock, H>) -> bool,
) where
    H: coopmqtt::network::application::mqtt::PublishHandler,
{
    let deadline = Instant::now() + Duration::from_secs(15);
    while !done(client) && Instant::now() < deadline {
        client.task();
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
#[ignore = "needs a reachable MQTT broker"]
fn test_publish_and_receive_on_public_broker() {
    let (host, port) = broker();
    let received = Rc::new(RefCell::new(Vec::<Vec<u8>>::new()));
    let sink = Rc::clone(&received);

    let mut client: Client<_, _, _, _> = Client::with_handler(
        StdStack::default(),
        StdResolver::default(),
        StdClock(Instant::now()),
        move |_topic: &str, payload: &[u8]| sink.borrow_mut().push(payload.to_vec()),
    );
    client.acquire().unwrap();
    client
        .configure(Options {
            port: Some(port),
            keep_alive_seconds: 10,
            retry_limit: u16::MAX,
            ..Options::with_server(&host).unwrap()
        })
        .unwrap();
    client.connect("coopmqtt-test-4711", "", "", None).unwrap();
    run_until(&mut client, |c| !c.is_busy());
    assert_eq!(client.phase(), Phase::Idle);
    assert!(client.is_connected(), "refused: {:?}", client.response_code());

    client.subscribe("coopmqtt/test/4711", QoS::AtLeastOnce).unwrap();
    run_until(&mut client, |c| !c.is_busy());

    client
        .publish("coopmqtt/test/4711", b"hello", QoS::AtLeastOnce, false)
        .unwrap();
    run_until(&mut client, |_| !received.borrow().is_empty());
    assert_eq!(received.borrow()[0], b"hello");

    client.disconnect().unwrap();
    run_until(&mut client, |c| c.phase() == Phase::Home);
    assert!(client.release().unwrap().is_success());
}
