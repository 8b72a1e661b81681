use criterion::{black_box, criterion_group, criterion_main, Criterion};
use resilience_core::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn circuit_breaker_throughput_success(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = CircuitBreakerConfig { failure_threshold: 10, ..CircuitBreakerConfig::default() };
    let breaker = CircuitBreaker::new("bench", config);
    let token = CancellationToken::new();

    c.bench_function("circuit_breaker_success", |b| {
        b.to_async(&rt).iter(|| async {
            let result = breaker
                .execute(black_box(&token), || async { Ok::<_, ResilienceError<std::io::Error>>(1) })
                .await;
            black_box(result).unwrap();
        });
    });
}

fn circuit_breaker_throughput_rejected(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        timeout: Duration::from_secs(30),
        ..CircuitBreakerConfig::default()
    };
    let breaker = CircuitBreaker::new("bench-open", config);
    let token = CancellationToken::new();

    rt.block_on(async {
        let _ = breaker
            .execute(&token, || async {
                Err::<(), _>(ResilienceError::<std::io::Error>::Inner(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "boom",
                )))
            })
            .await;
    });

    c.bench_function("circuit_breaker_rejected", |b| {
        b.to_async(&rt).iter(|| async {
            let result = breaker
                .execute(black_box(&token), || async { Ok::<_, ResilienceError<std::io::Error>>(1) })
                .await;
            black_box(result.unwrap_err());
        });
    });
}

criterion_group!(benches, circuit_breaker_throughput_success, circuit_breaker_throughput_rejected);
criterion_main!(benches);
