//! Shared-secret gate applied to every incoming RPC.
//!
//! The check runs as a tower layer under the gRPC router, where the request
//! path (`/flex.FlexService/GetJob`) is still visible. A missing
//! `authorization` entry is reported as `Unauthenticated`, a wrong one as
//! `PermissionDenied`. With an empty password the gate admits everything.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Request, Response};
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};

/// Read-only client methods anonymous dashboards may call without a token.
pub const ANONYMOUS_METHODS: &[&str] = &[
    "/flex.FlexService/GetJob",
    "/flex.FlexService/GetJobOutput",
    "/flex.FlexService/GetPackage",
    "/flex.FlexService/GetStats",
    "/flex.FlexService/ListFlexlets",
    "/flex.FlexService/ListJobs",
    "/flex.FlexService/ListTags",
];

#[derive(Clone)]
pub struct AuthGate {
    password: Arc<str>,
}

impl AuthGate {
    pub fn new(password: &str) -> Self {
        Self {
            password: Arc::from(password),
        }
    }

    pub fn check(&self, method: &str, headers: &HeaderMap) -> Result<(), Status> {
        if self.password.is_empty() {
            return Ok(());
        }
        if ANONYMOUS_METHODS.contains(&method) {
            return Ok(());
        }
        let Some(value) = headers.get("authorization") else {
            return Err(Status::unauthenticated("authentication required"));
        };
        let expected = format!("Bearer {}", self.password);
        if value.to_str().ok() != Some(expected.as_str()) {
            return Err(Status::permission_denied("wrong password"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuthLayer {
    gate: AuthGate,
}

impl AuthLayer {
    pub fn new(gate: AuthGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = Auth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Auth {
            inner,
            gate: self.gate.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Auth<S> {
    inner: S,
    gate: AuthGate,
}

impl<S, ReqBody> Service<Request<ReqBody>> for Auth<S>
where
    S: Service<Request<ReqBody>, Response = Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let gate = self.gate.clone();
        // Take the ready inner service and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            if let Err(status) = gate.check(req.uri().path(), req.headers()) {
                return Ok(deny(status));
            }
            inner.call(req).await
        })
    }
}

/// Builds the grpc-status trailer response for a rejected call.
fn deny(status: Status) -> Response<BoxBody> {
    let mut res = Response::new(tonic::body::empty_body());
    res.headers_mut()
        .insert("content-type", HeaderValue::from_static("application/grpc"));
    res.headers_mut()
        .insert("grpc-status", HeaderValue::from(status.code() as i32));
    if let Ok(message) = HeaderValue::from_str(status.message()) {
        res.headers_mut().insert("grpc-message", message);
    }
    res
}
