//! Request routing: map URL patterns and HTTP methods to handler functions,
//! and run the hooks around them.
//!
//! Routes are matched in registration order; the first route whose pattern
//! and method both match the incoming request wins. A pattern match with the
//! wrong method is remembered so the request ends as 405 instead of 404.
//!
//! Sub-routers are attached with [`Router::mount`]. A non-local mount splices
//! the sub-router's hooks into this router's chains; a local mount keeps them
//! private to the mounted routes.

use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::context::PathArgs;
use crate::http::{Method, Request, Response, StatusCode};
use crate::server::Shutdown;

mod dispatch;
pub mod handler;
mod hooks;
pub mod pattern;

pub use handler::{
    IntoBeforeOutcome, IntoExceptionHandler, IntoHandler, IntoHandlerResult, IntoResponse, Json,
};
pub use pattern::{PatternError, TypeRegistry, UrlPattern};

use handler::{Handler, IntoBeforeHook, IntoStatusHandler, after_error_hook, after_hook};
use hooks::HookSet;

// A single registered route binding a method set + pattern to a handler.
pub struct Route {
    methods: Vec<Method>,
    pattern: UrlPattern,
    handler: Handler,
    url_prefix: String,
    // Hooks of the local mounts this route came through, outermost first.
    scopes: Vec<Arc<HookSet>>,
}

impl Route {
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn template(&self) -> &str {
        self.pattern.template()
    }

    /// The accumulated prefix of the mounts this route came through.
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    fn accepts(&self, method: &Method) -> bool {
        self.methods.contains(method)
            || (*method == Method::Head && self.methods.contains(&Method::Get))
    }
}

/// The result of looking a request up in the route table.
pub enum RouteMatch<'a> {
    /// A route matched; its arguments are bound.
    Found { route: &'a Route, args: PathArgs },
    /// An `OPTIONS` request for a path no route handles `OPTIONS` for; carries
    /// the synthesized `Allow` list.
    Options(Vec<Method>),
    /// The path matched but the method did not; carries the methods of the
    /// first mismatching route.
    MethodNotAllowed(&'a [Method]),
    NotFound,
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// # Examples
///
/// ```rust,no_run
/// use picodot::{Request, Router, abort};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_req| async { "pong" }).unwrap();
///
/// router.get("/users/<int:id>", |req| async move {
///     match req.url_args().int("id") {
///         Some(id) if id > 0 => Ok(format!("user {id}")),
///         _ => Err(abort(404)),
///     }
/// }).unwrap();
/// ```
pub struct Router {
    routes: Vec<Route>,
    hooks: HookSet,
    types: TypeRegistry,
    config: Config,
    shutdown: Arc<Shutdown>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router` with the default configuration.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use picodot::Router;
    ///
    /// let router = Router::new();
    /// assert!(router.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            routes: Vec::new(),
            hooks: HookSet::default(),
            types: TypeRegistry::default(),
            config,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Register a handler for the given methods on a URL template.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] if the template does not compile.
    pub fn route<F, Fut>(
        &mut self,
        template: &str,
        methods: impl IntoIterator<Item = Method>,
        handler: F,
    ) -> Result<&mut Self, PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        let pattern = UrlPattern::compile_with(template, &self.types)?;
        self.routes.push(Route {
            methods: methods.into_iter().collect(),
            pattern,
            handler: handler.into_handler(),
            url_prefix: String::new(),
            scopes: Vec::new(),
        });
        Ok(self)
    }

    /// Register a handler for `GET` (and therefore `HEAD`) requests.
    pub fn get<F, Fut>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.route(template, [Method::Get], handler)
    }

    /// Register a handler for `POST` requests.
    pub fn post<F, Fut>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.route(template, [Method::Post], handler)
    }

    /// Register a handler for `PUT` requests.
    pub fn put<F, Fut>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.route(template, [Method::Put], handler)
    }

    /// Register a handler for `PATCH` requests.
    pub fn patch<F, Fut>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.route(template, [Method::Patch], handler)
    }

    /// Register a handler for `DELETE` requests.
    pub fn delete<F, Fut>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.route(template, [Method::Delete], handler)
    }

    /// Register a hook that runs before every handler.
    ///
    /// A hook returning a response (or `Some(response)`) skips the remaining
    /// hooks and the handler.
    pub fn before_request<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoBeforeOutcome,
    {
        self.hooks.before.push(hook.into_before_hook());
        self
    }

    /// Register a hook that runs after every successful handler and may
    /// replace its response.
    pub fn after_request<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.hooks.after.push(after_hook(hook));
        self
    }

    /// Register a hook that runs after error responses: parse failures, 404,
    /// 405, 413 and anything handled on the error path.
    pub fn after_error_request<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Option<Request>, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.hooks.after_error.push(after_error_hook(hook));
        self
    }

    /// Register the response producer for a status code.
    ///
    /// Used for 400, 404, 405 and 413 outcomes, for [`abort`](crate::abort)
    /// with that status, and (for 500) for unhandled errors.
    pub fn error_handler<F, Fut>(&mut self, status: impl Into<StatusCode>, handler: F) -> &mut Self
    where
        F: Fn(Option<Request>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.hooks
            .set_status_handler(status.into(), handler.into_status_handler());
        self
    }

    /// Register a handler for the error class `E` and every class that
    /// declares `E` as an ancestor. `E = Error` catches everything.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use picodot::{Error, Request, Router};
    ///
    /// let mut router = Router::new();
    /// router.exception_handler::<std::num::ParseIntError>(|_req: Request, _err: Error| async {
    ///     ("not a number", 400)
    /// });
    /// ```
    pub fn exception_handler<E: 'static>(&mut self, handler: impl IntoExceptionHandler) -> &mut Self {
        self.hooks
            .set_exception_handler(TypeId::of::<E>(), handler.into_exception_handler());
        self
    }

    /// Register a named URL segment type whose matches bind as strings.
    pub fn register_type(&mut self, name: impl Into<String>, pattern: impl Into<String>) -> &mut Self {
        self.types.register(name, pattern);
        self
    }

    /// Register a named URL segment type with a converter. A converter
    /// returning `None` makes the route not match.
    pub fn register_parsed_type<T, F>(
        &mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        parse: F,
    ) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        self.types.register_parsed(name, pattern, parse);
        self
    }

    /// Attach every route of `sub` under `prefix`.
    ///
    /// With `local` set, the sub-router's hooks and error handlers only apply
    /// to requests matching its routes. Otherwise they join this router's
    /// chains, after the hooks already registered here.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] if a prefixed template does not compile.
    pub fn mount(&mut self, sub: Router, prefix: &str, local: bool) -> Result<&mut Self, PatternError> {
        let Router {
            routes,
            hooks,
            types,
            ..
        } = sub;
        self.types.merge(&types);

        let (scope, spliced) = if local {
            (Some(Arc::new(hooks)), None)
        } else {
            (None, Some(hooks))
        };
        let mut mounted = Vec::with_capacity(routes.len());
        for mut route in routes {
            let template = format!("{prefix}{}", route.pattern.template());
            route.pattern = UrlPattern::compile_with(&template, &self.types)?;
            route.url_prefix = format!("{prefix}{}", route.url_prefix);
            if let Some(scope) = &scope {
                route.scopes.insert(0, Arc::clone(scope));
            }
            mounted.push(route);
        }
        self.routes.extend(mounted);
        if let Some(hooks) = spliced {
            self.hooks.extend(hooks);
        }
        Ok(self)
    }

    /// Look up the route for a request.
    pub fn find_route(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        if *method == Method::Options && !self.has_explicit_options(path) {
            return RouteMatch::Options(self.allowed_methods(path));
        }

        let mut mismatch = None;
        for route in &self.routes {
            if let Some(args) = route.pattern.matches(path) {
                if route.accepts(method) {
                    return RouteMatch::Found { route, args };
                }
                mismatch.get_or_insert(route);
            }
        }

        match mismatch {
            Some(route) => RouteMatch::MethodNotAllowed(&route.methods),
            None => RouteMatch::NotFound,
        }
    }

    /// Every method registered for a pattern matching `path`, without
    /// duplicates, plus `HEAD` when `GET` is present and `OPTIONS`.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut allow: Vec<Method> = Vec::new();
        for route in self.routes.iter().filter(|r| r.pattern.matches(path).is_some()) {
            for method in &route.methods {
                if !allow.contains(method) {
                    allow.push(method.clone());
                }
            }
        }
        if allow.contains(&Method::Get) && !allow.contains(&Method::Head) {
            allow.push(Method::Head);
        }
        if !allow.contains(&Method::Options) {
            allow.push(Method::Options);
        }
        allow
    }

    fn has_explicit_options(&self, path: &str) -> bool {
        self.routes.iter().any(|route| {
            route.methods.contains(&Method::Options) && route.pattern.matches(path).is_some()
        })
    }

    /// Request shutdown: the serving loop stops accepting connections and
    /// returns once in-flight ones finish. Callable from a handler through
    /// `req.app()`.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Returns the routes in match order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub(crate) fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
