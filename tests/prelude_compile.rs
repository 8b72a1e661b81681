//! Compile-time prelude coverage test.
use resilience_core::prelude::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let _backoff = Backoff::constant(Duration::from_millis(1));
    let _jitter = Jitter::None;

    let config = ResilienceConfig::default();
    config.validate().expect("defaults are valid");

    let call: ResilientCall<std::io::Error> =
        ResilientCall::from_config("svc", config).expect("valid resilient call");
    let token = CancellationToken::new();
    let result = call.execute(&token, || async { Ok::<_, ResilienceError<std::io::Error>>(1) }).await;
    assert_eq!(result.unwrap(), 1);

    let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
    let _layer = ShutdownAdmissionLayer::new(coordinator);

    assert_eq!(CODE_CIRCUIT_OPEN, "RES-001");
    assert_eq!(CODE_BULKHEAD_FULL, "RES-002");
    assert_eq!(CODE_TIMEOUT_EXCEEDED, "RES-003");
    assert_eq!(CODE_MAX_RETRIES_EXCEEDED, "RES-004");
    assert_eq!(CODE_SHUTTING_DOWN, "SYS-002");
}
