use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quicoor::tracer::stats::ConnectionStats;
use quicoor::tracer::types::{ConnectionId, EncryptionLevel, Perspective, RttSample};
use quicoor::QlogWriter;

fn client_stats() -> ConnectionStats {
    ConnectionStats::new(
        Arc::from("bench-node"),
        Perspective::Client,
        ConnectionId::new(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04]),
    )
}

fn rtt_sample(ms: u64) -> RttSample {
    RttSample {
        min: Duration::from_millis(ms),
        smoothed: Duration::from_millis(ms + 2),
        variance: Duration::from_millis(ms / 4),
    }
}

fn bench_stats_mutators(c: &mut Criterion) {
    c.bench_function("stats/packet_counters", |b| {
        let mut stats = client_stats();
        b.iter(|| {
            stats.record_packet_sent();
            stats.record_packet_received();
            stats.record_packet_buffered();
            stats.record_packet_dropped();
            stats.record_packet_lost();
            black_box(stats.packets_sent)
        })
    });

    c.bench_function("stats/rtt_update", |b| {
        let mut stats = client_stats();
        let sample = rtt_sample(23);
        b.iter(|| {
            stats.record_rtt(black_box(sample));
            black_box(stats.last_rtt.smoothed)
        })
    });

    c.bench_function("stats/pto_sequence", |b| {
        let mut stats = client_stats();
        b.iter(|| {
            for backoff in [0u32, 1, 1, 2, 0, 3] {
                stats.record_pto(black_box(backoff));
            }
            black_box(stats.pto_count)
        })
    });

    c.bench_function("stats/key_install_check", |b| {
        let mut stats = client_stats();
        stats.record_rtt(rtt_sample(20));
        stats.record_key_installed(EncryptionLevel::OneRtt, Perspective::Client);
        // Steady state: the snapshot is taken, later installs must be cheap.
        b.iter(|| {
            stats.record_key_installed(
                black_box(EncryptionLevel::OneRtt),
                black_box(Perspective::Client),
            );
            black_box(stats.handshake_rtt)
        })
    });
}

fn bench_trace_write(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let odcid = ConnectionId::new(&[0xbe, 0xef]);
    let record = b"{\"time\":1234.567,\"name\":\"transport:packet_sent\",\"data\":{\"header\":{\"packet_type\":\"1RTT\",\"packet_number\":4242}}}\n";

    c.bench_function("trace/write_record", |b| {
        let mut writer =
            QlogWriter::create(dir.path(), Perspective::Client, &odcid).expect("creating writer");
        b.iter(|| {
            writer.write_all(black_box(record)).expect("writing record");
        })
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_stats_mutators(c);
    bench_trace_write(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
