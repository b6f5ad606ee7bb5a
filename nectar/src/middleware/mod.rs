//! The middleware chain.
//!
//! Middleware is `(request, context, next) -> response`; registration
//! order is preserved and the first middleware added runs outermost.
//! Chains are compiled once at router build time into plain slices;
//! per request, [`Next`] just walks an index into the compiled slice —
//! no closure nesting is allocated.

use std::{marker::PhantomData, rc::Rc};

use async_trait::async_trait;
use nectar_core::{
    context::{FromParentContext, RequestContext},
    HttpError, Request, Response,
};

use crate::handler::RouteHandler;

mod collect_body;
pub mod metrics;
mod timeout;
pub mod tracing;

pub use collect_body::CollectBodyMiddleware;
pub use metrics::MetricsMiddleware;
pub use self::tracing::TracingMiddleware;
pub use timeout::TimeoutMiddleware;

/// Anything that can turn a request into a response within a typed
/// context: route endpoints, the router dispatcher, composed chains.
#[async_trait(?Send)]
pub trait Responder<Ctx>: 'static {
    async fn respond(&self, request: Request, ctx: Ctx) -> Result<Response, HttpError>;
}

/// A single middleware layer.
///
/// May replace the request before `next`, rewrite the response after,
/// or short-circuit by not calling `next` at all.
#[async_trait(?Send)]
pub trait Middleware<Ctx>: 'static {
    async fn handle(
        &self,
        request: Request,
        ctx: Ctx,
        next: Next<'_, Ctx>,
    ) -> Result<Response, HttpError>;
}

/// The continuation handed to a middleware: the remaining compiled
/// layers plus the tail responder.
pub struct Next<'a, Ctx> {
    remaining: &'a [Rc<dyn Middleware<Ctx>>],
    tail: &'a dyn Responder<Ctx>,
}

impl<'a, Ctx: 'static> Next<'a, Ctx> {
    pub async fn run(self, request: Request, ctx: Ctx) -> Result<Response, HttpError> {
        match self.remaining.split_first() {
            Some((first, rest)) => {
                let next = Next {
                    remaining: rest,
                    tail: self.tail,
                };
                first.handle(request, ctx, next).await
            }
            None => self.tail.respond(request, ctx).await,
        }
    }
}

/// A compiled middleware stack around a tail responder.
pub(crate) struct Layered<Ctx> {
    middlewares: Rc<[Rc<dyn Middleware<Ctx>>]>,
    tail: Rc<dyn Responder<Ctx>>,
}

impl<Ctx> Layered<Ctx> {
    pub(crate) fn new(
        middlewares: Vec<Rc<dyn Middleware<Ctx>>>,
        tail: Rc<dyn Responder<Ctx>>,
    ) -> Self {
        Self {
            middlewares: middlewares.into(),
            tail,
        }
    }
}

#[async_trait(?Send)]
impl<Ctx: 'static> Responder<Ctx> for Layered<Ctx> {
    async fn respond(&self, request: Request, ctx: Ctx) -> Result<Response, HttpError> {
        Next {
            remaining: &self.middlewares,
            tail: self.tail.as_ref(),
        }
        .run(request, ctx)
        .await
    }
}

/// Tail responder wrapping a route handler.
pub(crate) struct HandlerResponder<Ctx> {
    handler: Rc<dyn RouteHandler<Ctx>>,
}

impl<Ctx> HandlerResponder<Ctx> {
    pub(crate) fn new(handler: Rc<dyn RouteHandler<Ctx>>) -> Self {
        Self { handler }
    }
}

#[async_trait(?Send)]
impl<Ctx: 'static> Responder<Ctx> for HandlerResponder<Ctx> {
    async fn respond(&self, request: Request, ctx: Ctx) -> Result<Response, HttpError> {
        self.handler.invoke(request, ctx).await
    }
}

/// Context-type boundary: converts the parent context into the child
/// type before descending. The only legal way to change typed
/// per-request state mid-pipeline.
pub(crate) struct ContextTransform<Parent, Child> {
    inner: Rc<dyn Responder<Child>>,
    _parent: PhantomData<fn(Parent)>,
}

impl<Parent, Child> ContextTransform<Parent, Child> {
    pub(crate) fn new(inner: Rc<dyn Responder<Child>>) -> Self {
        Self {
            inner,
            _parent: PhantomData,
        }
    }
}

#[async_trait(?Send)]
impl<Parent, Child> Responder<Parent> for ContextTransform<Parent, Child>
where
    Parent: RequestContext,
    Child: FromParentContext<Parent>,
{
    async fn respond(&self, request: Request, ctx: Parent) -> Result<Response, HttpError> {
        let child = Child::from_parent(ctx)?;
        self.inner.respond(request, child).await
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use http::StatusCode;
    use nectar_core::RequestBody;

    use super::*;
    use crate::encode::IntoResponse;

    #[derive(Clone, Default)]
    struct Trace(Rc<RefCell<Vec<&'static str>>>);

    struct Tagger(&'static str, Trace);

    #[async_trait(?Send)]
    impl Middleware<()> for Tagger {
        async fn handle(
            &self,
            request: Request,
            ctx: (),
            next: Next<'_, ()>,
        ) -> Result<Response, HttpError> {
            self.1 .0.borrow_mut().push(self.0);
            let response = next.run(request, ctx).await;
            self.1 .0.borrow_mut().push(self.0);
            response
        }
    }

    struct Short;

    #[async_trait(?Send)]
    impl Middleware<()> for Short {
        async fn handle(
            &self,
            _request: Request,
            _ctx: (),
            _next: Next<'_, ()>,
        ) -> Result<Response, HttpError> {
            Ok(StatusCode::ACCEPTED.into_response())
        }
    }

    struct Tail;

    #[async_trait(?Send)]
    impl Responder<()> for Tail {
        async fn respond(&self, _request: Request, _ctx: ()) -> Result<Response, HttpError> {
            Ok("tail".into_response())
        }
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/")
            .body(RequestBody::empty())
            .unwrap()
    }

    fn run<F: std::future::Future>(f: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn first_added_runs_outermost() {
        run(async {
            let trace = Trace::default();
            let chain = Layered::new(
                vec![
                    Rc::new(Tagger("outer", trace.clone())),
                    Rc::new(Tagger("inner", trace.clone())),
                ],
                Rc::new(Tail),
            );
            let response = chain.respond(request(), ()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                *trace.0.borrow(),
                vec!["outer", "inner", "inner", "outer"]
            );
        });
    }

    #[test]
    fn short_circuit_skips_tail() {
        run(async {
            let trace = Trace::default();
            let chain = Layered::new(
                vec![
                    Rc::new(Tagger("outer", trace.clone())),
                    Rc::new(Short),
                    Rc::new(Tagger("unreached", trace.clone())),
                ],
                Rc::new(Tail),
            );
            let response = chain.respond(request(), ()).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            assert_eq!(*trace.0.borrow(), vec!["outer", "outer"]);
        });
    }
}
