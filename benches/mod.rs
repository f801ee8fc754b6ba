use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    network::application::mqtt::codec::bench_encode_publish,
    network::application::mqtt::codec::bench_read_publish,
    network::application::mqtt::client::bench_publish_qos0,
    network::application::mqtt::client::bench_publish_qos1,
    network::application::mqtt::client::bench_inbound_publish
);
criterion_main!(benches);
