use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use voiscope::{FrameLayout, HistoryBuffer, Identity, OverlapAdd};

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("OverlapAdd.process_frames()", |b| {
        let layout = FrameLayout::new(2, 512, 128, 512, 4, 8).unwrap();
        let mut engine = OverlapAdd::new(layout);
        let input = vec![0.25f32; layout.block_samples()];
        let mut output = vec![0.0f32; layout.block_samples()];

        b.iter(|| engine.process_frames(black_box(&input), &mut output, &mut Identity))
    });

    c.bench_function("HistoryBuffer.set()", |b| {
        let mut history = HistoryBuffer::new((257, 128), 0.0);
        let columns = Array2::<f32>::ones((257, 4));

        b.iter(|| history.set(black_box(columns.view())))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
