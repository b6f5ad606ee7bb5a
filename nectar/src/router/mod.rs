//! The router: pattern registration DSL, groups and collections,
//! compilation into the trie, and the dispatching responder.

use std::rc::Rc;

use async_trait::async_trait;
use http::{header, Method};
use nectar_core::{
    context::{ContextSource, FromContextSource, FromParentContext, Parameters, RequestContext},
    HttpApp, HttpError, Request, Response, ResponseBody,
};
use tracing::warn;

use crate::{
    handler::RouteHandler,
    middleware::{ContextTransform, HandlerResponder, Layered, Middleware, Responder},
};

mod trie;

use trie::{canonical_pattern, parse_pattern, RouteTarget, TrieNode};

/// Two patterns whose coexistence would make the match order
/// observable. Startup-time, fatal.
#[derive(thiserror::Error, Debug)]
#[error("conflicting route patterns: '{path}' collides with '{existing}'")]
pub struct RouterValidationError {
    pub path: String,
    pub existing: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    /// Fold literal segments to lower case on insert and lookup.
    pub case_insensitive: bool,
    /// Install a synthetic HEAD wherever a GET handler exists without
    /// one.
    pub auto_generate_head: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            auto_generate_head: true,
        }
    }
}

struct RouteDef<Ctx> {
    method: Method,
    pattern: String,
    responder: Rc<dyn Responder<Ctx>>,
}

/// Route registration surface. Build with handlers and middleware,
/// then compile once into a [`RouterService`].
pub struct Router<Ctx> {
    middlewares: Vec<Rc<dyn Middleware<Ctx>>>,
    routes: Vec<RouteDef<Ctx>>,
    options: RouterOptions,
}

impl<Ctx: RequestContext> Default for Router<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: RequestContext> Router<Ctx> {
    pub fn new() -> Self {
        Self::with_options(RouterOptions::default())
    }

    pub fn with_options(options: RouterOptions) -> Self {
        Self {
            middlewares: Vec::new(),
            routes: Vec::new(),
            options,
        }
    }

    /// Router-level middleware: wraps every route *and* the not-found
    /// path, so logging and metrics observe misses too.
    pub fn add_middleware(&mut self, middleware: impl Middleware<Ctx>) -> &mut Self {
        self.middlewares.push(Rc::new(middleware));
        self
    }

    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler<Ctx>,
    ) -> &mut Self {
        self.routes.push(RouteDef {
            method,
            pattern: pattern.to_string(),
            responder: Rc::new(HandlerResponder::new(Rc::new(handler))),
        });
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::PATCH, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::HEAD, pattern, handler)
    }

    /// A prefix group sharing this router's context type. Middleware
    /// added to the group only applies inside it.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_, Ctx> {
        RouteGroup {
            router: self,
            prefix: prefix.to_string(),
            middlewares: Vec::new(),
        }
    }

    /// Attach a reusable collection under `prefix`.
    pub fn mount(&mut self, prefix: &str, collection: RouteCollection<Ctx>) -> &mut Self {
        for route in collection.compile() {
            self.routes.push(RouteDef {
                method: route.method,
                pattern: join_paths(prefix, &route.pattern),
                responder: route.responder,
            });
        }
        self
    }

    /// Attach a collection whose routes run in a derived context; the
    /// conversion happens at the group boundary and may fail the
    /// request.
    pub fn mount_with_context<Child>(
        &mut self,
        prefix: &str,
        collection: RouteCollection<Child>,
    ) -> &mut Self
    where
        Child: FromParentContext<Ctx>,
    {
        for route in collection.compile() {
            self.routes.push(RouteDef {
                method: route.method,
                pattern: join_paths(prefix, &route.pattern),
                responder: Rc::new(ContextTransform::<Ctx, Child>::new(route.responder)),
            });
        }
        self
    }

    /// Reject trees with colliding patterns, reporting both.
    pub fn validate(&self) -> Result<(), RouterValidationError> {
        let (_, conflicts) = self.build_trie();
        match conflicts.into_iter().next() {
            Some((existing, path)) => Err(RouterValidationError { path, existing }),
            None => Ok(()),
        }
    }

    fn build_trie(&self) -> (TrieNode<Ctx>, Vec<(String, String)>) {
        let mut root = TrieNode::default();
        let mut conflicts = Vec::new();
        for route in &self.routes {
            let segments = parse_pattern(&route.pattern, self.options.case_insensitive);
            let pattern: Rc<str> = canonical_pattern(&segments).into();
            root.insert(
                &segments,
                &pattern,
                route.method.clone(),
                RouteTarget {
                    pattern: pattern.clone(),
                    responder: route.responder.clone(),
                },
                &mut conflicts,
            );
        }
        (root, conflicts)
    }

    /// Compile the middleware chain and the trie into the runtime
    /// responder.
    pub fn build(self) -> RouterService<Ctx> {
        let (mut root, _) = self.build_trie();
        if self.options.auto_generate_head {
            root.install_auto_head(&|target| RouteTarget {
                pattern: target.pattern.clone(),
                responder: Rc::new(HeadResponder {
                    inner: target.responder,
                }),
            });
        }
        let dispatcher = Dispatcher {
            root: Rc::new(root),
            case_insensitive: self.options.case_insensitive,
        };
        RouterService {
            chain: Rc::new(Layered::new(self.middlewares, Rc::new(dispatcher))),
        }
    }
}

/// Prefix group borrowing the router; consumed-and-returned so calls
/// chain.
pub struct RouteGroup<'r, Ctx> {
    router: &'r mut Router<Ctx>,
    prefix: String,
    middlewares: Vec<Rc<dyn Middleware<Ctx>>>,
}

impl<'r, Ctx: RequestContext> RouteGroup<'r, Ctx> {
    /// Group middleware; siblings outside the group are unaffected.
    pub fn add(mut self, middleware: impl Middleware<Ctx>) -> Self {
        self.middlewares.push(Rc::new(middleware));
        self
    }

    pub fn group(self, prefix: &str) -> Self {
        RouteGroup {
            prefix: join_paths(&self.prefix, prefix),
            middlewares: self.middlewares.clone(),
            router: self.router,
        }
    }

    pub fn route(
        self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler<Ctx>,
    ) -> Self {
        let responder: Rc<dyn Responder<Ctx>> = if self.middlewares.is_empty() {
            Rc::new(HandlerResponder::new(Rc::new(handler)))
        } else {
            Rc::new(Layered::new(
                self.middlewares.clone(),
                Rc::new(HandlerResponder::new(Rc::new(handler))),
            ))
        };
        self.router.routes.push(RouteDef {
            method,
            pattern: join_paths(&self.prefix, pattern),
            responder,
        });
        self
    }

    pub fn get(self, pattern: &str, handler: impl RouteHandler<Ctx>) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl RouteHandler<Ctx>) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl RouteHandler<Ctx>) -> Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl RouteHandler<Ctx>) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl RouteHandler<Ctx>) -> Self {
        self.route(Method::PATCH, pattern, handler)
    }
}

/// A reusable bundle of routes and middleware, attachable at any
/// prefix (possibly in a different context type via
/// [`Router::mount_with_context`]).
pub struct RouteCollection<Ctx> {
    middlewares: Vec<Rc<dyn Middleware<Ctx>>>,
    routes: Vec<RouteDef<Ctx>>,
}

impl<Ctx: RequestContext> Default for RouteCollection<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: RequestContext> RouteCollection<Ctx> {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn add_middleware(&mut self, middleware: impl Middleware<Ctx>) -> &mut Self {
        self.middlewares.push(Rc::new(middleware));
        self
    }

    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler<Ctx>,
    ) -> &mut Self {
        self.routes.push(RouteDef {
            method,
            pattern: pattern.to_string(),
            responder: Rc::new(HandlerResponder::new(Rc::new(handler))),
        });
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl RouteHandler<Ctx>) -> &mut Self {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Nest another collection under a prefix.
    pub fn mount(&mut self, prefix: &str, collection: RouteCollection<Ctx>) -> &mut Self {
        for route in collection.compile() {
            self.routes.push(RouteDef {
                method: route.method,
                pattern: join_paths(prefix, &route.pattern),
                responder: route.responder,
            });
        }
        self
    }

    /// Wrap every route with this collection's middleware.
    fn compile(self) -> Vec<RouteDef<Ctx>> {
        let middlewares = self.middlewares;
        self.routes
            .into_iter()
            .map(|route| RouteDef {
                method: route.method,
                pattern: route.pattern,
                responder: if middlewares.is_empty() {
                    route.responder
                } else {
                    Rc::new(Layered::new(middlewares.clone(), route.responder))
                },
            })
            .collect()
    }
}

fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}/{path}")
    }
}

/// The trie walker at the tail of the chain.
struct Dispatcher<Ctx> {
    root: Rc<TrieNode<Ctx>>,
    case_insensitive: bool,
}

#[async_trait(?Send)]
impl<Ctx: RequestContext> Responder<Ctx> for Dispatcher<Ctx> {
    async fn respond(&self, request: Request, mut ctx: Ctx) -> Result<Response, HttpError> {
        let path = request.uri().path().to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut captured = Parameters::default();
        let node = self
            .root
            .matches(&segments, &mut captured, self.case_insensitive)
            .filter(|node| node.has_handlers())
            .ok_or_else(HttpError::not_found)?;

        let target = match node.target(request.method()) {
            Some(target) => target,
            None => return Err(HttpError::method_not_allowed(&node.allowed_methods())),
        };

        ctx.core_mut().endpoint_path.set(target.pattern.to_string());
        ctx.core_mut().parameters.extend(captured);
        target.responder.respond(request, ctx).await
    }
}

/// Synthetic HEAD: run the GET responder, keep the headers (including
/// the content length it implies), drop the body.
struct HeadResponder<Ctx> {
    inner: Rc<dyn Responder<Ctx>>,
}

#[async_trait(?Send)]
impl<Ctx: 'static> Responder<Ctx> for HeadResponder<Ctx> {
    async fn respond(&self, request: Request, ctx: Ctx) -> Result<Response, HttpError> {
        let response = self.inner.respond(request, ctx).await?;
        let (mut parts, body) = response.into_parts();
        if !parts.headers.contains_key(header::CONTENT_LENGTH) {
            if let Some(len) = body.size_hint() {
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
            }
        }
        Ok(http::Response::from_parts(parts, ResponseBody::empty()))
    }
}

/// The compiled application pipeline: router-level middleware around
/// the dispatcher, with the outermost error-to-response mapping.
pub struct RouterService<Ctx> {
    chain: Rc<Layered<Ctx>>,
}

impl<Ctx> Clone for RouterService<Ctx> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
        }
    }
}

impl<Ctx: FromContextSource> HttpApp for RouterService<Ctx> {
    async fn respond(&self, request: Request, source: ContextSource) -> Response {
        let ctx = Ctx::from_source(source);
        match self.chain.respond(request, ctx).await {
            Ok(response) => response,
            Err(err) => {
                if err.status().is_server_error() {
                    warn!("request failed: {err}");
                }
                err.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::StatusCode;
    use nectar_core::context::{BasicContext, CoreContext};

    use super::*;
    use crate::{
        encode::IntoResponse,
        middleware::Next,
        testing::RouterTestClient,
        Middleware,
    };

    fn run<F: std::future::Future>(f: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .enable_timer()
            .build()
            .unwrap()
            .block_on(f)
    }

    fn ok(body: &'static str) -> impl Fn(Request, BasicContext) -> std::future::Ready<Result<&'static str, HttpError>> {
        move |_req, _ctx| std::future::ready(Ok(body))
    }

    #[test]
    fn tie_break_order_at_every_level() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get("/a/list", ok("literal"));
            router.get("/a/item.{ext}", ok("prefixed"));
            router.get("/a/{name}", ok("parameter"));
            router.get("/w/*", ok("wildcard"));
            router.get("/r/**", ok("recursive"));
            let client = RouterTestClient::new(router);

            assert_eq!(client.get("/a/list").await.body_str(), "literal");
            assert_eq!(client.get("/a/item.css").await.body_str(), "prefixed");
            assert_eq!(client.get("/a/other").await.body_str(), "parameter");
            assert_eq!(client.get("/w/anything").await.body_str(), "wildcard");
            assert_eq!(client.get("/r/x/y/z").await.body_str(), "recursive");

            // Matching is greedy: a parameter child that dead-ends is
            // not retried against deeper alternatives.
            assert_eq!(
                client.get("/a/x/y").await.status,
                StatusCode::NOT_FOUND
            );
        });
    }

    #[test]
    fn parameters_capture_in_pattern_order() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get("/users/{user}/posts/{post}", |_req, ctx: BasicContext| async move {
                let names: Vec<String> = ctx
                    .parameters()
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                Ok::<_, HttpError>(names.join(","))
            });
            let client = RouterTestClient::new(router);
            assert_eq!(
                client.get("/users/7/posts/42").await.body_str(),
                "user=7,post=42"
            );
        });
    }

    #[test]
    fn captured_parameters_reconstruct_the_path() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get(
                "/files/{dir}/doc.{ext}",
                |_req, ctx: BasicContext| async move {
                    let endpoint = ctx.endpoint_path().get().unwrap();
                    // Substituting the captures back into the pattern
                    // must rebuild the request path.
                    let mut rebuilt = endpoint;
                    for (name, value) in ctx.parameters().iter() {
                        rebuilt = rebuilt.replace(&format!("{{{name}}}"), value);
                    }
                    Ok::<_, HttpError>(rebuilt)
                },
            );
            let client = RouterTestClient::new(router);
            assert_eq!(
                client.get("/files/reports/doc.txt").await.body_str(),
                "/files/reports/doc.txt"
            );
        });
    }

    #[test]
    fn recursive_wildcard_records_remainder() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get("/static/**", |_req, ctx: BasicContext| async move {
                Ok::<_, HttpError>(ctx.parameters().get("*").unwrap_or("").to_string())
            });
            let client = RouterTestClient::new(router);
            assert_eq!(
                client.get("/static/css/site/main.css").await.body_str(),
                "css/site/main.css"
            );
        });
    }

    #[test]
    fn wrong_method_is_405_with_allow() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get("/thing", ok("get"));
            router.post("/thing", ok("post"));
            let client = RouterTestClient::new(router);

            let resp = client
                .execute(Method::DELETE, "/thing", &[], bytes::Bytes::new())
                .await;
            assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(resp.header("allow"), Some("GET, HEAD, POST"));

            let missing = client.get("/nothing").await;
            assert_eq!(missing.status, StatusCode::NOT_FOUND);
        });
    }

    #[test]
    fn auto_head_keeps_content_length_and_drops_body() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get("/hello", ok("GET: Hello"));
            let client = RouterTestClient::new(router);

            let resp = client
                .execute(Method::HEAD, "/hello", &[], bytes::Bytes::new())
                .await;
            assert_eq!(resp.status, StatusCode::OK);
            assert_eq!(resp.header("content-length"), Some("10"));
            assert!(resp.body.is_empty());
        });
    }

    #[test]
    fn case_insensitive_literals() {
        run(async {
            let mut router = Router::<BasicContext>::with_options(RouterOptions {
                case_insensitive: true,
                ..RouterOptions::default()
            });
            router.get("/Admin/Panel", ok("panel"));
            let client = RouterTestClient::new(router);
            assert_eq!(client.get("/admin/panel").await.body_str(), "panel");
            assert_eq!(client.get("/ADMIN/PANEL").await.body_str(), "panel");
        });
    }

    struct Stamp(&'static str);

    #[async_trait(?Send)]
    impl Middleware<BasicContext> for Stamp {
        async fn handle(
            &self,
            request: Request,
            ctx: BasicContext,
            next: Next<'_, BasicContext>,
        ) -> Result<Response, HttpError> {
            let mut response = next.run(request, ctx).await?;
            response.headers_mut().append(
                http::header::HeaderName::from_static("x-stamp"),
                http::header::HeaderValue::from_static(self.0),
            );
            Ok(response)
        }
    }

    #[test]
    fn group_middleware_only_applies_inside_group() {
        run(async {
            let mut router = Router::<BasicContext>::new();
            router.get("/outside", ok("outside"));
            router
                .group("/admin")
                .add(Stamp("admin"))
                .get("/panel", ok("panel"));
            let client = RouterTestClient::new(router);

            assert_eq!(
                client.get("/admin/panel").await.header("x-stamp"),
                Some("admin")
            );
            assert_eq!(client.get("/outside").await.header("x-stamp"), None);
        });
    }

    #[test]
    fn endpoint_path_visible_to_outer_middleware() {
        struct EchoRoute;

        #[async_trait(?Send)]
        impl Middleware<BasicContext> for EchoRoute {
            async fn handle(
                &self,
                request: Request,
                ctx: BasicContext,
                next: Next<'_, BasicContext>,
            ) -> Result<Response, HttpError> {
                let endpoint = ctx.endpoint_path();
                next.run(request, ctx).await?;
                Ok(endpoint.get().unwrap_or_default().into_response())
            }
        }

        run(async {
            let mut router = Router::<BasicContext>::new();
            router.add_middleware(EchoRoute);
            router.get("/users/{id}", ok("user"));
            let client = RouterTestClient::new(router);
            assert_eq!(client.get("/users/42").await.body_str(), "/users/{id}");
        });
    }

    #[derive(Clone)]
    struct CountedContext {
        core: CoreContext,
        label: &'static str,
    }

    impl RequestContext for CountedContext {
        fn core(&self) -> &CoreContext {
            &self.core
        }
        fn core_mut(&mut self) -> &mut CoreContext {
            &mut self.core
        }
    }

    impl FromParentContext<BasicContext> for CountedContext {
        fn from_parent(parent: BasicContext) -> Result<Self, HttpError> {
            Ok(Self {
                core: parent.core().clone(),
                label: "derived",
            })
        }
    }

    #[test]
    fn mounted_collection_changes_context_type() {
        run(async {
            let mut admin = RouteCollection::<CountedContext>::new();
            admin.get("/whoami", |_req, ctx: CountedContext| async move {
                Ok::<_, HttpError>(format!("{}:{}", ctx.label, ctx.parameters().len()))
            });

            let mut router = Router::<BasicContext>::new();
            router.mount_with_context::<CountedContext>("/admin", admin);
            let client = RouterTestClient::new(router);
            assert_eq!(client.get("/admin/whoami").await.body_str(), "derived:0");
        });
    }

    #[test]
    fn validate_reports_conflicting_patterns() {
        let mut router = Router::<BasicContext>::new();
        router.get("/users/{id}", ok("a"));
        router.get("/users/{name}/x", ok("b"));
        let err = router.validate().unwrap_err();
        assert_eq!(err.existing, "/users/{id}");
        assert!(err.path.contains("{name}"));

        let mut router = Router::<BasicContext>::new();
        router.get("/files/{name}", ok("a"));
        router.get("/files/*", ok("b"));
        assert!(router.validate().is_err());

        let mut router = Router::<BasicContext>::new();
        router.get("/ok/{id}", ok("a"));
        router.post("/ok/{id}", ok("b"));
        router.get("/ok/literal", ok("c"));
        assert!(router.validate().is_ok());
    }
}
