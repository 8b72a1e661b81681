//! HTTP admission middleware: rejects new requests once shutdown has been
//! initiated, with an RFC 7807 `application/problem+json` body.

use crate::shutdown::ShutdownCoordinator;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Externally-visible error code for the 503 shutdown-rejection body; part
/// of the crate's ABI alongside the `RES-00x` codes (§6).
pub const CODE_SHUTTING_DOWN: &str = "SYS-002";

/// Default `type` URI used in the RFC 7807 body when no base URL is
/// configured. Callers running behind a documented problem-details base
/// (e.g. `https://errors.example.com/`) should override it with
/// [`ShutdownAdmissionLayer::with_problem_type_base`].
const DEFAULT_PROBLEM_TYPE: &str = "about:blank";

struct ShutdownProblem {
    retry_after_secs: u64,
    instance: String,
    type_uri: Arc<str>,
}

impl IntoResponse for ShutdownProblem {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "type": self.type_uri.as_ref(),
            "title": "Service Unavailable",
            "status": 503,
            "detail": "the server is shutting down and is no longer accepting new requests",
            "instance": self.instance,
            "code": CODE_SHUTTING_DOWN,
        });

        let mut response = (StatusCode::SERVICE_UNAVAILABLE, axum::Json(body)).into_response();
        response
            .headers_mut()
            .insert("Content-Type", "application/problem+json".parse().unwrap());
        response
            .headers_mut()
            .insert("Retry-After", self.retry_after_secs.to_string().parse().unwrap());
        response.headers_mut().insert("Connection", "close".parse().unwrap());
        response
    }
}

/// Wraps a Tower/axum service: every request increments the shutdown
/// coordinator's active-request count on entry and decrements it on every
/// exit path (success, inner error, or panic while polling the inner
/// future), so the drain loop never sees a stuck counter.
#[derive(Clone)]
pub struct ShutdownAdmissionLayer {
    coordinator: ShutdownCoordinator,
    problem_type_base: Arc<str>,
}

impl ShutdownAdmissionLayer {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator, problem_type_base: Arc::from(DEFAULT_PROBLEM_TYPE) }
    }

    /// Overrides the `type` URI reported in the RFC 7807 body. Passed through
    /// unchanged, so callers typically supply a fully-qualified problem-type
    /// URL such as `https://errors.example.com/shutting-down`.
    pub fn with_problem_type_base(mut self, base: impl Into<Arc<str>>) -> Self {
        self.problem_type_base = base.into();
        self
    }
}

impl<S> Layer<S> for ShutdownAdmissionLayer {
    type Service = ShutdownAdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ShutdownAdmissionService {
            inner,
            coordinator: self.coordinator.clone(),
            problem_type_base: self.problem_type_base.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownAdmissionService<S> {
    inner: S,
    coordinator: ShutdownCoordinator,
    problem_type_base: Arc<str>,
}

/// Decrements the active-request counter when dropped, regardless of how the
/// future enclosing it ends (normal completion, early return, or panic
/// unwinding through it).
struct ActiveGuard(ShutdownCoordinator);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.decrement_active();
    }
}

impl<S> Service<Request<Body>> for ShutdownAdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if !self.coordinator.increment_active() {
            let instance = req.uri().path().to_string();
            let grace_secs = self.coordinator.grace_period().as_secs().max(1);
            let type_uri = self.problem_type_base.clone();
            return Box::pin(async move {
                Ok(ShutdownProblem { retry_after_secs: grace_secs, instance, type_uri }.into_response())
            });
        }

        let guard = ActiveGuard(self.coordinator.clone());
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let result = inner.call(req).await;
            drop(guard);
            result
        })
    }
}
