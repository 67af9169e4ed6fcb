use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::RngCore;

use yfetch::block::{BlockAssembler, BlockKind};
use yfetch::checksum::{crc16_arc, crc16_arc_bitwise};
use yfetch::Block;

fn bench_crc16(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16_arc");

    for kind in [BlockKind::Short, BlockKind::Long] {
        let mut payload = vec![0u8; kind.payload_len()];
        rand::thread_rng().fill_bytes(&mut payload);
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("table", payload.len()), &payload, |b, p| {
            b.iter(|| crc16_arc(black_box(p)))
        });
        group.bench_with_input(BenchmarkId::new("bitwise", payload.len()), &payload, |b, p| {
            b.iter(|| crc16_arc_bitwise(black_box(p)))
        });
    }

    group.finish();
}

fn bench_assemble(c: &mut Criterion) {
    let mut data = vec![0u8; 1024];
    rand::thread_rng().fill_bytes(&mut data);
    let frame = Block::encode(BlockKind::Long, 1, &data);

    c.bench_function("assemble_long_block_mtu20", |b| {
        let mut assembler = BlockAssembler::new();
        b.iter(|| {
            assembler.arm();
            for fragment in frame.chunks(20) {
                assembler.feed(black_box(fragment));
            }
            black_box(assembler.take())
        })
    });
}

criterion_group!(benches, bench_crc16, bench_assemble);
criterion_main!(benches);
