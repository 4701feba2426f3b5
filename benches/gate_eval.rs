use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use phasegate::core::artifact::EvidenceProbe;
use phasegate::core::config::{Config, Settings};
use phasegate::core::gate::{Gate, NoOverride};
use phasegate::core::phase::Phase;
use phasegate::core::resolver;
use phasegate::core::store::{Artifact, Store, Workflow};
use phasegate::core::time;
use std::path::Path;
use std::time::Duration;

struct AnySize;

impl EvidenceProbe for AnySize {
    fn file_size(&self, _path: &Path) -> Option<u64> {
        Some(4096)
    }
}

/// `count` workflows in phase 6, each owning ten files and one glob.
fn store_with(count: usize, now: i64) -> Store {
    let mut store = Store::default();
    for i in 0..count {
        let mut wf = Workflow::new(&time::format_epoch_z(now - 600));
        wf.current_phase = Phase::Implement;
        wf.red_test_done = true;
        wf.affected_files = (0..10)
            .map(|j| format!("src/feature_{}/file_{}.py", i, j))
            .chain(std::iter::once(format!("lib/feature_{}/*", i)))
            .collect();
        wf.test_artifacts.push(Artifact {
            artifact_type: "test_output".to_string(),
            path: format!("evidence/red_{}.txt", i),
            description: "login test fails with AssertionError".to_string(),
            created: Some(time::format_epoch_z(now - 300)),
            phase: Some(Phase::TddRed.as_str().to_string()),
            ..Artifact::default()
        });
        store.workflows.insert(format!("feature-{}", i), wf);
    }
    store.active_workflow = Some("feature-0".to_string());
    store
}

fn bench_gate_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate_evaluate");
    group.measurement_time(Duration::from_secs(5));
    let config = Config::new("/proj", Settings::default());
    let now = time::now_secs();

    for count in [1usize, 10, 100] {
        let store = store_with(count, now);
        let gate = Gate::new(&config, AnySize, now).expect("gate");
        let last_owned = format!("/proj/src/feature_{}/file_9.py", count - 1);

        group.bench_with_input(BenchmarkId::new("owned_last", count), &count, |b, _| {
            b.iter(|| {
                black_box(gate.evaluate(Ok(&store), &NoOverride, black_box(&last_owned), Some("Edit")))
            });
        });
        group.bench_with_input(BenchmarkId::new("unowned", count), &count, |b, _| {
            b.iter(|| {
                black_box(gate.evaluate(Ok(&store), &NoOverride, black_box("src/stray.py"), Some("Write")))
            });
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let now = time::now_secs();
    let store = store_with(100, now);
    let root = Path::new("/proj");

    group.bench_function("glob_claim", |b| {
        b.iter(|| black_box(resolver::resolve(&store, root, black_box("lib/feature_99/deep/x.py"))));
    });
    group.bench_function("exact_claim", |b| {
        b.iter(|| black_box(resolver::resolve(&store, root, black_box("src/feature_50/file_3.py"))));
    });

    group.finish();
}

criterion_group!(benches, bench_gate_evaluate, bench_resolve);
criterion_main!(benches);
