use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use instarelink::EnvMap;
use instarelink::artifact::{BinaryArtifact, kind_from_name};
use instarelink::editor::parse_otool_rpaths;
use instarelink::wrap::render_launcher;
use std::path::Path;

fn bench_kind_from_name(c: &mut Criterion) {
    let names = vec![
        Path::new("lib/libclntsh.dylib.12.1"),
        Path::new("lib/libocci.dylib"),
        Path::new("lib/libc.so.6"),
        Path::new("bin/sqlplus"),
    ];

    c.bench_function("kind_from_name", |b| {
        b.iter(|| {
            for name in &names {
                let _ = kind_from_name(black_box(name));
            }
        })
    });
}

fn bench_inspect(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("libclntsh.dylib.12.1");
    let mut header = 0xfeedfacfu32.to_le_bytes().to_vec();
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&6u32.to_le_bytes());
    std::fs::write(&path, header).unwrap();

    c.bench_function("inspect", |b| {
        b.iter(|| BinaryArtifact::inspect(black_box(&path)))
    });
}

fn bench_parse_otool(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_otool_rpaths");

    for count in [1usize, 16, 128] {
        let mut output = String::from("/opt/lib/libclntsh.dylib.12.1:\n");
        for i in 0..count {
            output.push_str(&format!(
                "Load command {}\n          cmd LC_RPATH\n      cmdsize 32\n         path /opt/lib{} (offset 12)\n",
                i, i
            ));
        }
        group.bench_with_input(BenchmarkId::from_parameter(count), &output, |b, out| {
            b.iter(|| parse_otool_rpaths(black_box(out.as_bytes())))
        });
    }

    group.finish();
}

fn bench_render_launcher(c: &mut Criterion) {
    let mut env = EnvMap::new();
    env.insert("ORACLE_HOME".into(), "/opt/oracle-client-sdk".into());
    env.insert("OCI_LIB".into(), "/opt/oracle-client-sdk/lib".into());
    env.insert("TNS_ADMIN".into(), "/opt/oracle-client-sdk/network/admin".into());
    env.insert("NLS_LANG".into(), "AMERICAN_AMERICA.UTF8".into());

    c.bench_function("render_launcher", |b| {
        b.iter(|| {
            render_launcher(
                black_box(Path::new("/opt/oracle-client-sdk/libexec/bin/sqlplus")),
                black_box(&env),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_kind_from_name,
    bench_inspect,
    bench_parse_otool,
    bench_render_launcher
);
criterion_main!(benches);
