use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use custos::{FileStateStore, MemoryStateStore, SecretManager, SecretPayload, StateStore};
use std::sync::Arc;

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    let sizes = [("100B", 100), ("1KB", 1024), ("10KB", 10 * 1024)];

    // In-memory store: measures snapshot copy-and-swap alone.
    let mem: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let manager = SecretManager::load(mem).unwrap();
    for (name, size) in sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("memory/{name}"), |b| {
            b.iter(|| {
                manager
                    .store(black_box("bench-key"), SecretPayload::new(vec![0u8; size]))
                    .unwrap()
            })
        });
    }

    // File store: adds encode, fsync and rename.
    let dir = tempfile::TempDir::new().unwrap();
    let file: Arc<dyn StateStore> = Arc::new(FileStateStore::open(dir.path()).unwrap());
    let manager = SecretManager::load(file).unwrap();
    for (name, size) in sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("file/{name}"), |b| {
            b.iter(|| {
                manager
                    .store(black_box("bench-key"), SecretPayload::new(vec![0u8; size]))
                    .unwrap()
            })
        });
    }
    group.finish();

    c.bench_function("retrieve", |b| {
        b.iter(|| manager.retrieve(black_box("bench-key")).unwrap())
    });
}

criterion_group!(benches, bench_store);
criterion_main!(benches);
