use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use miio_protocol::core::command::CommandDraft;
use miio_protocol::utils::crypto::MiioCrypto;
use miio_protocol::MiioMessage;

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");
    let token = [0x5A; 16];
    let device_id = [0x04, 0x8c, 0x3a, 0x21];
    let body = vec![0xAB; 256];

    group.bench_function("encode", |b| {
        b.iter(|| MiioMessage::encode(&device_id, 1_700_000_000, &token, &body).unwrap())
    });

    let frame = MiioMessage::encode(&device_id, 1_700_000_000, &token, &body).unwrap();
    group.bench_function("decode", |b| {
        b.iter(|| MiioMessage::decode(&frame, &token).unwrap())
    });

    group.finish();
}

fn bench_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("cipher");
    let crypto = MiioCrypto::new(&[0x5A; 16]);
    let commands: Vec<String> = (1..=8)
        .map(|id| {
            CommandDraft::new("get_prop", r#"["power","mode","temperature","humidity"]"#)
                .unwrap()
                .assign(id)
                .request()
                .to_string()
        })
        .collect();

    group.bench_function("encrypt", |b| {
        b.iter_batched(
            || commands.clone(),
            |requests| {
                for request in requests {
                    let _ = crypto.encrypt(request.as_bytes()).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    let blob = crypto.encrypt(commands[0].as_bytes()).unwrap();
    group.bench_function("decrypt", |b| b.iter(|| crypto.decrypt(&blob).unwrap()));

    group.bench_function("derive_key", |b| b.iter(|| MiioCrypto::new(&[0x5A; 16])));

    group.finish();
}

criterion_group!(benches, bench_frame_codec, bench_cipher);
criterion_main!(benches);
