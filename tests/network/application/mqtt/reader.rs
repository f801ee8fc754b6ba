use coopmqtt::network::application::mqtt::{ByteSource, FrameBuffer, ReadStatus, ReaderCursor};
use coopmqtt::network::application::mqtt::packet::encode_remaining_length;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

const CAPACITY: usize = 64;

/// Hands the reader a random number of bytes at a time
struct Chunked {
    bytes: VecDeque<u8>,
    released: usize,
}

impl Chunked {
    fn release(&mut self, count: usize) {
        self.released = (self.released + count).min(self.bytes.len());
    }
}

impl ByteSource for Chunked {
    fn available(&mut self) -> usize {
        self.released
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.released == 0 {
            return None;
        }
        self.released -= 1;
        self.bytes.pop_front()
    }
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut digits = [0; 4];
    let count = encode_remaining_length(body.len(), &mut digits).unwrap();
    let mut frame = vec![header];
    frame.extend_from_slice(&digits[..count]);
    frame.extend_from_slice(body);
    frame
}

fn random_frame(rng: &mut StdRng) -> Vec<u8> {
    if rng.gen_bool(0.5) {
        let qos1 = rng.gen_bool(0.5);
        let topic_len = rng.gen_range(1..20);
        let mut body = vec![0, topic_len as u8];
        body.extend((0..topic_len).map(|_| rng.gen_range(b'a'..=b'z')));
        if qos1 {
            body.extend_from_slice(&rng.gen_range(1u16..=u16::MAX).to_be_bytes());
        }
        body.extend((0..rng.gen_range(0..150)).map(|_| rng.r#gen::<u8>()));
        frame(if qos1 { 0x32 } else { 0x30 }, &body)
    } else {
        let header = [0x40, 0x90, 0xB0, 0xD0][rng.gen_range(0..4)];
        let body: Vec<u8> = (0..rng.gen_range(0..100)).map(|_| rng.r#gen()).collect();
        frame(header, &body)
    }
}

#[test]
fn test_random_chunking_reassembles_every_frame() {
    let mut rng = StdRng::seed_from_u64(0x6d71_7474);
    let frames: Vec<Vec<u8>> = (0..200).map(|_| random_frame(&mut rng)).collect();

    let mut source = Chunked {
        bytes: frames.iter().flatten().copied().collect(),
        released: 0,
    };
    let mut cursor = ReaderCursor::new();
    let mut buffer: FrameBuffer<CAPACITY> = FrameBuffer::new();
    let mut seen = Vec::new();

    for _ in 0..100_000 {
        if seen.len() == frames.len() {
            break;
        }
        source.release(rng.gen_range(0..8));
        match cursor.poll(&mut source, &mut buffer).unwrap() {
            ReadStatus::Pending => {}
            ReadStatus::Complete(len) => seen.push((len, buffer.as_slice().to_vec())),
        }
    }

    assert_eq!(seen.len(), frames.len());
    for (expected, (len, bytes)) in frames.iter().zip(&seen) {
        if expected.len() <= CAPACITY {
            assert_eq!(*len, expected.len());
            assert_eq!(bytes, expected);
        } else {
            assert_eq!(*len, 0);
        }
    }
    assert!(source.bytes.is_empty());
    assert!(cursor.is_idle());
}

#[test]
fn test_header_alone_is_not_consumed() {
    let mut source = Chunked {
        bytes: VecDeque::from(vec![0xD0, 0x00]),
        released: 1,
    };
    let mut cursor = ReaderCursor::new();
    let mut buffer: FrameBuffer<CAPACITY> = FrameBuffer::new();

    assert_eq!(cursor.poll(&mut source, &mut buffer), Ok(ReadStatus::Pending));
    assert_eq!(source.bytes.len(), 2);

    source.release(1);
    assert_eq!(cursor.poll(&mut source, &mut buffer), Ok(ReadStatus::Complete(2)));
    assert_eq!(buffer.as_slice(), &[0xD0, 0x00]);
}
