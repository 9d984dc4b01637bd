use criterion::{black_box, criterion_group, criterion_main, Criterion};
use debx::codec::{decode, Decoded};
use debx::engine::{Engine, ExtractOptions};
use debx::event::NullSink;
use debx::sniff::{sniff, FormatKind};
use std::io::{self, Write};
use std::sync::Arc;

fn tar_of(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// A package whose data member holds `nested` small tarballs of 8 files each.
fn package(nested: usize) -> Vec<u8> {
    let inner: Vec<_> = (0..nested)
        .map(|i| {
            let files: Vec<_> = (0..8).map(|j| (format!("f{j}.bin"), vec![(i + j) as u8; 16 * 1024])).collect();
            (format!("usr/lib/part{i}.tar.gz"), gzip(&tar_of(&files)))
        })
        .collect();
    let control = gzip(&tar_of(&[("control".to_string(), b"Package: bench\n".to_vec())]));
    let data = zstd::encode_all(tar_of(&inner).as_slice(), 3).unwrap();

    let mut builder = ar::Builder::new(Vec::new());
    for (name, bytes) in [("debian-binary", b"2.0\n".to_vec()), ("control.tar.gz", control), ("data.tar.zst", data)] {
        builder.append(&ar::Header::new(name.as_bytes().to_vec(), bytes.len() as u64), bytes.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

fn bench_sniff(c: &mut Criterion) {
    let tar = tar_of(&[("a".to_string(), vec![0u8; 600])]);
    let gz = gzip(&tar);
    c.bench_function("sniff_tar", |b| b.iter(|| sniff(black_box(&tar[..512]))));
    c.bench_function("sniff_gzip", |b| b.iter(|| sniff(black_box(&gz))));
}

fn bench_decode(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];
    let gz = gzip(&data);
    c.bench_function("gunzip_1mb", |b| {
        b.iter(|| match decode(FormatKind::Gzip, black_box(gz.as_slice())).unwrap() {
            Decoded::Stream(mut stream) => io::copy(&mut stream, &mut io::sink()).unwrap(),
            Decoded::Unsupported { .. } => unreachable!(),
        })
    });
}

fn bench_extract(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bench.deb");
    std::fs::write(&input, package(16)).unwrap();

    let mut group = c.benchmark_group("extract_16x8");
    group.sample_size(10);
    for jobs in [1, 4] {
        group.bench_function(format!("jobs_{jobs}"), |b| {
            b.iter(|| {
                let out = tempfile::tempdir_in(dir.path()).unwrap();
                let options = ExtractOptions::default().output_dir(out.path()).jobs(jobs);
                let manifest = Engine::new(options).with_events(Arc::new(NullSink)).run(&input).unwrap();
                assert_eq!(manifest.entries.len(), 129);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sniff, bench_decode, bench_extract);
criterion_main!(benches);
