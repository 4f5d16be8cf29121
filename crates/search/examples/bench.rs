use fleet_search::compile_filter;
use std::time::Instant;

fn percentile_us(xs: &mut [u128], p: f64) -> u128 {
    xs.sort_unstable();
    let idx = ((xs.len() as f64 - 1.0) * p).round() as usize;
    xs[idx]
}

fn gen_filter(i: usize, terms: usize) -> String {
    let mut parts = Vec::with_capacity(terms);
    for t in 0..terms {
        let part = match (i + t) % 5 {
            0 => format!("labels.team{} = 'x{}'", t, i % 20),
            1 => format!("status.conditions.Ready = '{}'", if i % 2 == 0 { "True" } else { "False" }),
            2 => format!("generation >= {}", i % 100),
            3 => format!("(name = 'obj-{i:06}' OR labels.tier != 'gold')"),
            _ => "created_time > '2026-01-01T00:00:00Z'".to_string(),
        };
        parts.push(part);
    }
    parts.join(" AND ")
}

fn main() {
    let n: usize = std::env::var("FLEET_BENCH_QUERIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(20_000);
    let terms: usize = std::env::var("FLEET_BENCH_TERMS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    let filters: Vec<String> = (0..n).map(|i| gen_filter(i, terms)).collect();
    let mut times: Vec<u128> = Vec::with_capacity(n);
    let mut failed = 0usize;
    let t0 = Instant::now();
    for f in &filters {
        let t = Instant::now();
        if compile_filter(f).is_err() {
            failed += 1;
        }
        times.push(t.elapsed().as_micros());
    }
    let total_ms = t0.elapsed().as_secs_f64() * 1_000.0;
    let p50 = percentile_us(&mut times.clone(), 0.50);
    let p99 = percentile_us(&mut times, 0.99);
    println!(
        "compile: total={:.1}ms p50={}us p99={}us ({} filters, {} terms, {} failed)",
        total_ms, p50, p99, n, terms, failed
    );
}
