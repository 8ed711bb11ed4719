//! Stack map table construction benchmarks.
//!
//! Measures the full collect + plan + serialize pipeline for a method with
//! a realistic safepoint density: a few hundred safepoints, a handful of
//! distinct vreg locations, heavily repeating masks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vesper_stackmaps::{BitVector, InstructionSet, StackMapStream, VRegLocation};

fn bench_build_and_fill_in(c: &mut Criterion) {
    let sp_masks = [
        BitVector::from_bits(&[0, 2, 9]),
        BitVector::from_bits(&[1, 4]),
    ];

    c.bench_function("stream_512_safepoints", |b| {
        b.iter(|| {
            let mut stream = StackMapStream::new(InstructionSet::X64);
            for i in 0..512u32 {
                let sp_mask = &sp_masks[(i % 2) as usize];
                stream.begin_stack_map_entry(i, i * 8, 0x31, Some(sp_mask), 4, 0);
                stream.add_vreg_entry(VRegLocation::InRegister((i % 8) as u8));
                stream.add_vreg_entry(VRegLocation::None);
                stream.add_vreg_entry(VRegLocation::InStack(((i % 4) * 4) as i32));
                stream.add_vreg_entry(VRegLocation::Constant(7));
                stream.end_stack_map_entry();
            }
            let size = stream.prepare_for_fill_in();
            let mut region = vec![0u8; size];
            stream.fill_in(&mut region);
            black_box(region)
        })
    });
}

criterion_group!(benches, bench_build_and_fill_in);
criterion_main!(benches);
