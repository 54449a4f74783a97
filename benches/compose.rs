use criterion::{criterion_group, criterion_main, Criterion};
use deskboard::dashboard::{Dashboard, DashboardConfig, UiWaker, WidgetRegistry};
use eframe::egui;
use std::time::Instant;

fn config(dir: &std::path::Path) -> DashboardConfig {
    let mut yaml = format!(
        "cache_dir: {}\ncentral_widget:\n  type: tabs\n  widgets:\n",
        dir.display()
    );
    for tab in 0..20 {
        yaml.push_str(&format!(
            "    - type: splitter\n      tab_id: tab{tab}\n      widgets:\n        - {{type: clock}}\n        - type: container\n          widgets:\n            - {{type: clock, format: \"%H:%M:%S\"}}\n            - {{type: timer}}\n"
        ));
    }
    DashboardConfig::from_yaml_str(&yaml).expect("bench config")
}

fn bench_compose(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path());
    let registry = WidgetRegistry::with_defaults();

    c.bench_function("build_and_start_20_tabs", |b| {
        b.iter(|| {
            let mut dashboard =
                Dashboard::build(&cfg, &registry, UiWaker::noop(), &mut |_| {}).expect("build");
            dashboard.start();
            dashboard
        })
    });

    let mut dashboard = Dashboard::build(&cfg, &registry, UiWaker::noop(), &mut |_| {}).expect("build");
    dashboard.start();
    let ctx = egui::Context::default();
    c.bench_function("frame_20_tabs", |b| {
        b.iter(|| {
            dashboard.pump();
            dashboard.tick(Instant::now());
            ctx.run(egui::RawInput::default(), |ctx| dashboard.render(ctx))
        })
    });
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
