use coopmqtt::network::application::mqtt::encoder;
use coopmqtt::network::application::mqtt::{ByteSource, FrameBuffer, QoS, ReadStatus, ReaderCursor};
use criterion::{BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

struct Bytes<'a> {
    bytes: &'a [u8],
}

impl ByteSource for Bytes<'_> {
    fn available(&mut self) -> usize {
        self.bytes.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        let (first, rest) = self.bytes.split_first()?;
        self.bytes = rest;
        Some(*first)
    }
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..len).map(|_| rng.r#gen()).collect()
}

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");
    let payload = random_payload(200);
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("qos1_200_bytes", |b| {
        let mut buffer: FrameBuffer<256> = FrameBuffer::new();
        b.iter(|| {
            let frame = encoder::publish(
                &mut buffer,
                black_box("coopmqtt/bench/topic"),
                Some(7),
                black_box(&payload),
                QoS::AtLeastOnce,
                false,
            )
            .expect("frame fits");
            black_box(frame.len());
        })
    });
    group.finish();
}

pub fn bench_read_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_publish");
    let payload = random_payload(200);
    let mut encoded: FrameBuffer<256> = FrameBuffer::new();
    let frame = encoder::publish(
        &mut encoded,
        "coopmqtt/bench/topic",
        Some(7),
        &payload,
        QoS::AtLeastOnce,
        false,
    )
    .expect("frame fits")
    .to_vec();
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("qos1_200_bytes", |b| {
        b.iter_batched_ref(
            || (ReaderCursor::new(), FrameBuffer::<256>::new()),
            |(cursor, buffer)| {
                let mut source = Bytes { bytes: &frame };
                let status = cursor.poll(&mut source, buffer).expect("well formed");
                assert_eq!(status, ReadStatus::Complete(frame.len()));
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}
