//! Handler and hook callables, and the conversion of their return values
//! into responses.
//!
//! Handlers may return anything implementing [`IntoHandlerResult`]: a
//! [`Response`], text, bytes, JSON, `()` for an empty 204, a
//! `(body, status)` / `(body, status, headers)` / `(body, headers)` tuple, or
//! a `Result` of any of those. Normalization happens once, at the router
//! boundary.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Error;
use crate::http::{BoxFuture, Headers, Request, Response, StatusCode};

/// Type-erased request handler.
pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync>;

/// Runs before the handler. `Some(response)` ends the request early.
pub type BeforeHook =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Option<Response>, Error>> + Send + Sync>;

/// Runs after the handler and may replace the response.
pub type AfterHook = Arc<dyn Fn(Request, Response) -> BoxFuture<'static, Response> + Send + Sync>;

/// Runs after an error response was produced. The request is absent when it
/// could not be parsed.
pub type AfterErrorHook =
    Arc<dyn Fn(Option<Request>, Response) -> BoxFuture<'static, Response> + Send + Sync>;

/// Produces the response for a status code such as 404 or 500.
pub type StatusHandler =
    Arc<dyn Fn(Option<Request>) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync>;

/// Produces the response for an error class.
pub type ExceptionHandler =
    Arc<dyn Fn(Request, Error) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync>;

/// A JSON response body, serialized when the response is built.
///
/// # Examples
///
/// ```
/// use picodot::{Json, Request};
///
/// #[derive(serde::Serialize)]
/// struct User {
///     id: u32,
/// }
///
/// async fn show(_req: Request) -> Json<User> {
///     Json(User { id: 1 })
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

/// Converts a value into a [`Response`].
pub trait IntoResponse {
    fn into_response(self) -> Result<Response, Error>;
}

impl IntoResponse for Response {
    fn into_response(self) -> Result<Response, Error> {
        Ok(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::ok(self))
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::ok(self))
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::ok(self))
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::ok(self))
    }
}

impl IntoResponse for &'static [u8] {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::ok(Bytes::from_static(self)))
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::json(&self)?)
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::json(&self.0)?)
    }
}

/// No body: 204.
impl IntoResponse for () {
    fn into_response(self) -> Result<Response, Error> {
        Ok(Response::new(StatusCode::NO_CONTENT))
    }
}

impl<R: IntoResponse> IntoResponse for (R, u16) {
    fn into_response(self) -> Result<Response, Error> {
        (self.0, StatusCode::from(self.1)).into_response()
    }
}

impl<R: IntoResponse> IntoResponse for (R, StatusCode) {
    fn into_response(self) -> Result<Response, Error> {
        let mut response = self.0.into_response()?;
        response.set_status(self.1);
        Ok(response)
    }
}

impl<R: IntoResponse> IntoResponse for (R, Headers) {
    fn into_response(self) -> Result<Response, Error> {
        let mut response = self.0.into_response()?;
        // The first value of a name replaces the response's own; repeats are added.
        let mut replaced: Vec<&str> = Vec::new();
        for (name, value) in self.1.iter() {
            if replaced.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                response.add_header(name, value);
            } else {
                response.set_header(name, value);
                replaced.push(name);
            }
        }
        Ok(response)
    }
}

impl<R: IntoResponse> IntoResponse for (R, u16, Headers) {
    fn into_response(self) -> Result<Response, Error> {
        ((self.0, self.2), StatusCode::from(self.1)).into_response()
    }
}

impl<R: IntoResponse> IntoResponse for (R, StatusCode, Headers) {
    fn into_response(self) -> Result<Response, Error> {
        ((self.0, self.2), self.1).into_response()
    }
}

impl<R: IntoResponse, const N: usize> IntoResponse for (R, u16, [(&'static str, &'static str); N]) {
    fn into_response(self) -> Result<Response, Error> {
        ((self.0, Headers::from(self.2)), StatusCode::from(self.1)).into_response()
    }
}

/// The value a handler's future resolves to.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> Result<Response, Error>;
}

impl<R: IntoResponse, E: Into<Error>> IntoHandlerResult for Result<R, E> {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.map_err(Into::into)?.into_response()
    }
}

macro_rules! handler_result_via_response {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoHandlerResult for $ty {
                fn into_handler_result(self) -> Result<Response, Error> {
                    self.into_response()
                }
            }
        )*
    };
}

handler_result_via_response!(
    Response,
    &'static str,
    String,
    Bytes,
    Vec<u8>,
    &'static [u8],
    serde_json::Value,
    (),
);

impl<T: Serialize> IntoHandlerResult for Json<T> {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

impl<R: IntoResponse> IntoHandlerResult for (R, u16) {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

impl<R: IntoResponse> IntoHandlerResult for (R, StatusCode) {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

impl<R: IntoResponse> IntoHandlerResult for (R, Headers) {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

impl<R: IntoResponse> IntoHandlerResult for (R, u16, Headers) {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

impl<R: IntoResponse> IntoHandlerResult for (R, StatusCode, Headers) {
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

impl<R: IntoResponse, const N: usize> IntoHandlerResult
    for (R, u16, [(&'static str, &'static str); N])
{
    fn into_handler_result(self) -> Result<Response, Error> {
        self.into_response()
    }
}

/// The value a before-request hook's future resolves to.
pub trait IntoBeforeOutcome {
    fn into_before_outcome(self) -> Result<Option<Response>, Error>;
}

impl IntoBeforeOutcome for () {
    fn into_before_outcome(self) -> Result<Option<Response>, Error> {
        Ok(None)
    }
}

impl<R: IntoResponse> IntoBeforeOutcome for Option<R> {
    fn into_before_outcome(self) -> Result<Option<Response>, Error> {
        self.map(IntoResponse::into_response).transpose()
    }
}

impl<E: Into<Error>> IntoBeforeOutcome for Result<(), E> {
    fn into_before_outcome(self) -> Result<Option<Response>, Error> {
        self.map(|()| None).map_err(Into::into)
    }
}

impl<R: IntoResponse, E: Into<Error>> IntoBeforeOutcome for Result<Option<R>, E> {
    fn into_before_outcome(self) -> Result<Option<Response>, Error> {
        self.map_err(Into::into)?.into_before_outcome()
    }
}

/// Conversion trait for async request handlers.
///
/// Any `Fn(Request) -> impl Future` whose output implements
/// [`IntoHandlerResult`] implements this trait automatically, so router
/// methods accept `impl IntoHandler` without repeating the where-bounds.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler, boxing the returned future.
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>>;

    fn into_handler(self) -> Handler
    where
        Self: Sized,
    {
        Arc::new(move |req| self.call(req))
    }
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future + Send + 'static,
    F::Output: IntoHandlerResult,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let fut = (self)(req);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// Conversion trait for before-request hooks.
pub trait IntoBeforeHook: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Option<Response>, Error>>;

    fn into_before_hook(self) -> BeforeHook
    where
        Self: Sized,
    {
        Arc::new(move |req| self.call(req))
    }
}

impl<T, F> IntoBeforeHook for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future + Send + 'static,
    F::Output: IntoBeforeOutcome,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Option<Response>, Error>> {
        let fut = (self)(req);
        Box::pin(async move { fut.await.into_before_outcome() })
    }
}

/// Boxes an after-request hook.
pub fn after_hook<F, Fut>(hook: F) -> AfterHook
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req, res| Box::pin(hook(req, res)))
}

/// Boxes an after-error hook.
pub fn after_error_hook<F, Fut>(hook: F) -> AfterErrorHook
where
    F: Fn(Option<Request>, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req, res| Box::pin(hook(req, res)))
}

/// Conversion trait for status-code handlers.
pub trait IntoStatusHandler: Send + Sync + 'static {
    fn call(&self, req: Option<Request>) -> BoxFuture<'static, Result<Response, Error>>;

    fn into_status_handler(self) -> StatusHandler
    where
        Self: Sized,
    {
        Arc::new(move |req| self.call(req))
    }
}

impl<T, F> IntoStatusHandler for T
where
    T: Fn(Option<Request>) -> F + Send + Sync + 'static,
    F: Future + Send + 'static,
    F::Output: IntoHandlerResult,
{
    fn call(&self, req: Option<Request>) -> BoxFuture<'static, Result<Response, Error>> {
        let fut = (self)(req);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

/// Conversion trait for error-class handlers.
pub trait IntoExceptionHandler: Send + Sync + 'static {
    fn call(&self, req: Request, err: Error) -> BoxFuture<'static, Result<Response, Error>>;

    fn into_exception_handler(self) -> ExceptionHandler
    where
        Self: Sized,
    {
        Arc::new(move |req, err| self.call(req, err))
    }
}

impl<T, F> IntoExceptionHandler for T
where
    T: Fn(Request, Error) -> F + Send + Sync + 'static,
    F: Future + Send + 'static,
    F::Output: IntoHandlerResult,
{
    fn call(&self, req: Request, err: Error) -> BoxFuture<'static, Result<Response, Error>> {
        let fut = (self)(req, err);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::abort;

    fn normalize(value: impl IntoHandlerResult) -> Response {
        value.into_handler_result().unwrap()
    }

    #[test]
    fn text_defaults_to_200() {
        let r = normalize("hi");
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(r.body_ref().as_bytes(), Some(&b"hi"[..]));
    }

    #[test]
    fn unit_is_204() {
        let r = normalize(());
        assert_eq!(r.status(), StatusCode::NO_CONTENT);
        assert!(r.body_ref().is_empty());
    }

    #[test]
    fn tuples_set_status_and_override_headers() {
        let r = normalize(("created", 201));
        assert_eq!(r.status(), 201);

        let r = normalize((
            Response::ok("x").header("Content-Type", "text/plain"),
            202,
            [("Content-Type", "text/csv"), ("X-Extra", "1")],
        ));
        assert_eq!(r.status(), 202);
        assert_eq!(r.headers().get_all("content-type").collect::<Vec<_>>(), vec!["text/csv"]);
        assert_eq!(r.headers().get("x-extra"), Some("1"));

        let r = normalize(("x", Headers::from([("Location", "/")])));
        assert_eq!(r.status(), 200);
        assert_eq!(r.headers().get("location"), Some("/"));
    }

    #[test]
    fn repeated_tuple_headers_are_all_kept() {
        let r = normalize((
            Response::ok("ok").header("Set-Cookie", "stale=1"),
            200u16,
            Headers::from([("Set-Cookie", "a=1"), ("set-cookie", "b=2")]),
        ));
        assert_eq!(
            r.headers().get_all("set-cookie").collect::<Vec<_>>(),
            vec!["a=1", "b=2"]
        );
    }

    #[test]
    fn json_values() {
        let r = normalize(serde_json::json!([1, 2]));
        assert_eq!(r.headers().get("content-type"), Some("application/json; charset=UTF-8"));
        assert_eq!(r.body_ref().as_bytes(), Some(&b"[1,2]"[..]));

        let r = normalize((Json(vec!["a"]), 201));
        assert_eq!(r.status(), 201);
        assert_eq!(r.body_ref().as_bytes(), Some(&b"[\"a\"]"[..]));
    }

    #[test]
    fn results_pass_errors_through() {
        let ok: Result<&'static str, Error> = Ok("fine");
        assert_eq!(normalize(ok).status(), 200);
        let err: Result<&'static str, Error> = Err(abort(418));
        assert!(err.into_handler_result().is_err());
    }

    #[test]
    fn before_outcomes() {
        assert!(().into_before_outcome().unwrap().is_none());
        assert!(None::<&'static str>.into_before_outcome().unwrap().is_none());
        let r = Some(("denied", 401)).into_before_outcome().unwrap().unwrap();
        assert_eq!(r.status(), 401);
        let failed: Result<(), Error> = Err(abort(403));
        assert!(failed.into_before_outcome().is_err());
    }
}
