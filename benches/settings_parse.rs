use criterion::{black_box, criterion_group, criterion_main, Criterion};
use clr_rewriter::config::ProcessInfo;
use clr_rewriter::settings::{should_instrument, tokenize};

fn build_settings(lines: usize) -> String {
    let mut settings = String::new();
    for i in 0..lines {
        settings.push_str(&format!("Service{i}.exe \"--instance {i}\" --verbose\n"));
    }
    settings.push_str("dotnet \"Shop.Api.dll\" \"C:\\\\srv\\\\shop\"\n");
    settings
}

fn bench_tokenize(c: &mut Criterion) {
    let line = r#"dotnet "C:\\Program Files\\Shop\\Shop.Api.dll" --urls "http://*:80" --environment Production"#;
    c.bench_function("settings_tokenize_line", |b| b.iter(|| tokenize(black_box(line))));
}

fn bench_should_instrument(c: &mut Criterion) {
    let settings = build_settings(200);
    let process = ProcessInfo::new("dotnet", r"dotnet C:\srv\shop\Shop.Api.dll --urls http://*:80");
    c.bench_function("settings_should_instrument_200_lines", |b| {
        b.iter(|| {
            assert!(should_instrument(black_box(&settings), &process));
        })
    });
}

criterion_group!(benches, bench_tokenize, bench_should_instrument);
criterion_main!(benches);
