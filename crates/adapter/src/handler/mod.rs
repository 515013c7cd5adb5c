//! Request handlers served by [`HttpConnection::process`](crate::connection::HttpConnection::process).
//!
//! A handler receives the payload of one exchange and returns it once the
//! response was sent, so the connection can be reused.

use std::error::Error;
use std::future::Future;

#[trait_variant::make(Handler: Send)]
pub trait LocalHandler<P> {
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, payload: P) -> Result<P, Self::Error>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<P, F, Fut, Err> Handler<P> for HandlerFn<F>
where
    P: Send,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<P, Err>> + Send,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    type Error = Err;

    async fn call(&self, payload: P) -> Result<P, Self::Error> {
        (self.f)(payload).await
    }
}

/// Wraps an async function into a [`Handler`].
pub fn make_handler<F, P, Fut, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(P) -> Fut,
    Fut: Future<Output = Result<P, Err>>,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    HandlerFn { f }
}
