//! Interceptor chain: an ordered list of interceptors in front of one handler.
//!
//! # Composition
//!
//! Given interceptors `[I1, I2, I3]` and a handler `H`, running the chain calls
//! `I1`, which receives a [`Next`] for `[I2, I3] + H`, and so on:
//!
//! ```text
//!   forward:   I1 ─▶ I2 ─▶ I3 ─▶ H
//!   backward:  I1 ◀─ I2 ◀─ I3 ◀─ H
//! ```
//!
//! An interceptor may call `next.run(..)` at most once. `Next::run` consumes
//! the continuation, so a second call does not compile. Not calling it at all
//! short-circuits the request; the interceptor then writes its own response to
//! the sink.
//!
//! Interceptors share two things with everything ordered after them: the
//! [`RequestMetadata`] bag and the response headers on the sink.
//!
//! # Serving
//!
//! [`ChainService`] adapts a chain to `tower::Service` so it can be mounted with
//! `Router::route_service`. It resolves the client identity, creates the
//! metadata bag, runs the chain against an [`HttpResponseSink`] and returns
//! the resulting response. A handler error is not caught by any interceptor;
//! it is turned into a response by [`AppError`]'s `IntoResponse` impl.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::Service;
use tracing::trace;

use crate::error::{AppError, AppResult};

use super::capture::{HttpResponseSink, ResponseSink};
use super::ip::{TrustedProxyConfig, resolve_client_identity};
use super::metadata::RequestMetadata;

/// A boxed, sendable future borrowing from the request scope.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of cross-cutting request processing.
pub trait Interceptor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Process the request, optionally handing it to `next`.
    ///
    /// Errors returned by `next` must be propagated, not swallowed.
    fn intercept<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a mut RequestMetadata,
        sink: &'a mut dyn ResponseSink,
        next: Next<'a>,
    ) -> BoxFuture<'a, AppResult<()>>;
}

/// Terminal request handler.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a RequestMetadata,
    ) -> BoxFuture<'a, AppResult<Response<Body>>>;
}

/// Adapter for synchronous handler functions.
pub struct HandlerFn<F>(F);

impl<F> HandlerFn<F>
where
    F: Fn(Request<Body>, &RequestMetadata) -> AppResult<Response<Body>> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(Request<Body>, &RequestMetadata) -> AppResult<Response<Body>> + Send + Sync + 'static,
{
    fn call<'a>(
        &'a self,
        req: Request<Body>,
        meta: &'a RequestMetadata,
    ) -> BoxFuture<'a, AppResult<Response<Body>>> {
        let result = (self.0)(req, meta);
        Box::pin(async move { result })
    }
}

/// The rest of the chain, handed to each interceptor.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Run the remaining interceptors and the handler.
    ///
    /// The sink may be a wrapper that lives shorter than the chain itself
    /// (e.g. a [`ResponseCapture`](super::capture::ResponseCapture)).
    pub fn run<'b>(
        self,
        req: Request<Body>,
        meta: &'b mut RequestMetadata,
        sink: &'b mut dyn ResponseSink,
    ) -> BoxFuture<'b, AppResult<()>>
    where
        'a: 'b,
    {
        match self.remaining.split_first() {
            Some((interceptor, rest)) => {
                trace!(interceptor = interceptor.name(), "Entering interceptor");
                let next = Next {
                    remaining: rest,
                    handler: self.handler,
                };
                interceptor.intercept(req, meta, sink, next)
            }
            None => {
                let handler = self.handler;
                Box::pin(async move {
                    let response = handler.call(req, meta).await?;
                    write_response(response, sink).await
                })
            }
        }
    }
}

/// Copy a handler's response into the sink.
///
/// Headers already on the sink are kept unless the handler sets the same name.
async fn write_response(response: Response<Body>, sink: &mut dyn ResponseSink) -> AppResult<()> {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read handler body: {e}")))?;

    sink.headers_mut().extend(parts.headers);
    sink.set_status(parts.status);
    sink.write(&bytes);
    Ok(())
}

/// Ordered interceptors plus a terminal handler.
#[derive(Clone)]
pub struct MiddlewareChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn Handler>,
}

impl MiddlewareChain {
    pub fn new(handler: impl Handler) -> Self {
        Self {
            interceptors: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Append an interceptor. Interceptors run in the order they are added.
    pub fn with(self, interceptor: impl Interceptor) -> Self {
        self.with_shared(Arc::new(interceptor))
    }

    /// Append an interceptor that is shared with other chains.
    pub fn with_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub async fn run(
        &self,
        req: Request<Body>,
        meta: &mut RequestMetadata,
        sink: &mut dyn ResponseSink,
    ) -> AppResult<()> {
        let next = Next {
            remaining: &self.interceptors,
            handler: self.handler.as_ref(),
        };
        next.run(req, meta, sink).await
    }

    /// Wrap into a `tower::Service` for mounting on a router.
    pub fn into_service(self, trusted_proxies: Arc<TrustedProxyConfig>) -> ChainService {
        ChainService {
            chain: Arc::new(self),
            trusted_proxies,
        }
    }
}

/// `tower::Service` adapter around a [`MiddlewareChain`].
#[derive(Clone)]
pub struct ChainService {
    chain: Arc<MiddlewareChain>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl Service<Request<Body>> for ChainService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let chain = self.chain.clone();
        let identity = resolve_client_identity(&req, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            let mut meta = RequestMetadata::new(identity);
            let mut sink = HttpResponseSink::new();

            match chain.run(req, &mut meta, &mut sink).await {
                Ok(()) => Ok(sink.into_response()),
                Err(err) => {
                    // Keep headers interceptors already set (request id, security headers)
                    let mut response = err.into_response();
                    for (name, value) in sink.headers() {
                        if !response.headers().contains_key(name) {
                            response.headers_mut().insert(name.clone(), value.clone());
                        }
                    }
                    Ok(response)
                }
            }
        })
    }
}
