use criterion::{criterion_group, criterion_main, Criterion};
use pgrelay_core::Message;
use pgrelay_protocol::{encode, Decoder};
use serde_json::json;

fn frame_encode_decode_bench(c: &mut Criterion) {
    let msg = Message::new("select * from users where id = $1 and name = $2")
        .with_params(vec![json!(42), json!("alice")]);
    let wire = encode(&msg).expect("encode");
    c.bench_function("frame_encode", |b| {
        b.iter(|| encode(&msg).expect("encode"));
    });
    c.bench_function("frame_decode_whole", |b| {
        b.iter(|| {
            let mut decoder = Decoder::<Message>::new();
            decoder.feed(&wire)
        });
    });
    c.bench_function("frame_decode_chunked", |b| {
        b.iter(|| {
            let mut decoder = Decoder::<Message>::new();
            let mut frames = Vec::new();
            for chunk in wire.chunks(7) {
                frames.extend(decoder.feed(chunk).frames);
            }
            frames
        });
    });
}

criterion_group!(frame_benches, frame_encode_decode_bench);
criterion_main!(frame_benches);
