/// Log analysis throughput benchmarks
///
/// Measures parsing and each analysis pass over a synthetic single-process
/// log with descriptor reuse and full RPC lifecycles.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rpctrace::analysis::{Analyzer, Sections};
use rpctrace::config::AnalyzerConfig;
use rpctrace::descriptor::build_hierarchy;
use rpctrace::rpc_tracker::track_pid;
use rpctrace::LogStream;

const PRE: &str = "04/02-09:15:01.12 node1 CaRT[4242/4242]";

/// One mount descriptor plus `ops` open/release cycles, each with one RPC
fn synthetic_log(ops: usize) -> String {
    let mut log = format!("{PRE} il DBUG src/ioc/ioc_main.c:1 ioc_mount(0x10) Registered new 'projection' as root\n");
    for i in 0..ops {
        let fd = 0xA + (i % 16);
        let rpc = 0x1000 + i;
        log.push_str(&format!(
            "{PRE} il DBUG src/ioc/ops/open.c:88 ioc_open(0x{fd:x}) Registered new 'open' from 0x10\n\
             {PRE} il DBUG src/ioc/ops/open.c:95 ioc_open_req(0x{rpc:x}) Link 'RPC' to 0x{fd:x}\n\
             {PRE} rpc DBUG src/cart/crt_rpc.c:512 crt_rpc_priv_alloc(0x{rpc:x}) [opc=0x5 rpcid=0x{rpc:x} rank:tag=0:0] allocated.\n\
             {PRE} rpc DBUG src/cart/crt_rpc.c:1204 crt_req_send(0x{rpc:x}) [opc=0x5 rpcid=0x{rpc:x} rank:tag=0:0] submitted.\n\
             {PRE} rpc DBUG src/cart/crt_hg.c:1500 crt_hg_req_send(0x{rpc:x}) [opc=0x5 rpcid=0x{rpc:x} rank:tag=0:0] sent.\n\
             {PRE} rpc DBUG src/cart/crt_context.c:300 crt_rpc_complete(0x{rpc:x}) [opc=0x5] Invoking RPC callback (rank 0 tag 0) rc: 0\n\
             {PRE} rpc DBUG src/cart/crt_rpc.c:330 crt_rpc_priv_free(0x{rpc:x}) [opc=0x5] destroying (0x{rpc:x}), decref to 0.\n\
             {PRE} il DBUG src/ioc/ops/open.c:120 ioc_release(0x{fd:x}) Deregistered\n"
        ));
    }
    log
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for ops in [100usize, 1_000, 10_000] {
        let log = synthetic_log(ops);
        group.throughput(Throughput::Bytes(log.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ops), &log, |b, log| {
            b.iter(|| black_box(LogStream::parse(log).unwrap()));
        });
    }
    group.finish();
}

fn bench_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("passes");
    let stream = LogStream::parse(&synthetic_log(5_000)).unwrap();
    group.throughput(Throughput::Elements(stream.len() as u64));

    group.bench_function("rpc_tracker", |b| {
        b.iter(|| black_box(track_pid(&stream, 4242).unwrap()));
    });
    group.bench_function("hierarchy", |b| {
        b.iter(|| black_box(build_hierarchy(&stream, Some(4242)).unwrap()));
    });
    group.bench_function("full_analysis", |b| {
        b.iter(|| {
            let analyzer = Analyzer::new(&stream, AnalyzerConfig::default());
            black_box(analyzer.run(Sections::all(), None).unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_passes);
criterion_main!(benches);
