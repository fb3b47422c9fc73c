use core_lib::editor::{ControlLineEditor, SetMode};
use core_lib::microcode::{OpCodeTable, Phase};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn table_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Opcode table");
    group.sample_size(20);

    group.bench_function("compile built-in table", |b| b.iter(|| black_box(OpCodeTable::new())));

    let table = OpCodeTable::new();
    group.bench_function("EPROM images", |b| b.iter(|| black_box(table.eprom_images())));

    let mut edited = OpCodeTable::new();
    for op_code in [0x69, 0xA9, 0xEA] {
        // SBLA on phi-2 is always editable
        let _ = ControlLineEditor::set_line(edited.lookup_mut(op_code), 0, 1, Phase::Phi2, 13, SetMode::Toggle);
    }
    group.bench_function("edited cells", |b| b.iter(|| black_box(edited.edited_cells())));

    group.finish();
}

fn describe_benchmark(c: &mut Criterion) {
    let table = OpCodeTable::new();
    let adc = table.lookup(0x69);
    c.bench_function("summary of one cell", |b| {
        b.iter(|| black_box(ControlLineEditor::summary(adc, 0, 1, Phase::Phi2, true)))
    });
}

criterion_group!(benches, table_benchmark, describe_benchmark);
criterion_main!(benches);
