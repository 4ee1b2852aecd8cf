//! The per-connection pipeline: parse, route, run hooks and handler, handle
//! errors, write the response.

use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::handler::{ExceptionHandler, StatusHandler};
use super::hooks::HookSet;
use super::{Route, RouteMatch, Router, join_methods};
use crate::error::{Error, HandlerPanic};
use crate::http::{
    BoxFuture, ByteStream, ByteWrite, Method, Request, Response, StatusCode, is_peer_gone, shared,
};

/// Runs a handler or hook, turning a panic in either the call or the future
/// into a [`HandlerPanic`] error.
async fn guarded<T>(invoke: impl FnOnce() -> BoxFuture<'static, Result<T, Error>>) -> Result<T, Error> {
    let fut = match panic::catch_unwind(AssertUnwindSafe(invoke)) {
        Ok(fut) => fut,
        Err(payload) => return Err(panicked(payload)),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload)),
    }
}

fn panicked(payload: Box<dyn std::any::Any + Send>) -> Error {
    let panic = HandlerPanic::from_payload(payload);
    error!(message = %panic.message, "handler panicked");
    panic.into()
}

fn infallible(fut: BoxFuture<'static, Response>) -> BoxFuture<'static, Result<Response, Error>> {
    Box::pin(async move { Ok(fut.await) })
}

/// The response used when no status handler is registered.
fn builtin(status: StatusCode) -> Response {
    let body = match status.as_u16() {
        400 => "Bad request".to_owned(),
        404 | 405 => "Not found".to_owned(),
        413 => "Payload too large".to_owned(),
        500 => "Internal server error".to_owned(),
        code => format!("{code} error"),
    };
    let mut res = Response::ok(body);
    res.set_status(status);
    res
}

impl Router {
    /// Serves one connection: reads a request, dispatches it and writes the
    /// response unless the handler took the connection over.
    ///
    /// Errors from a peer that already went away are not reported.
    pub async fn handle_connection(
        self: Arc<Self>,
        stream: impl ByteStream + 'static,
        client_addr: Option<SocketAddr>,
    ) -> io::Result<()> {
        let conn = shared(stream);
        let req = match Request::create(Arc::clone(&self), Arc::clone(&conn), client_addr).await {
            Ok(Some(req)) => Some(req),
            Ok(None) => {
                debug!(?client_addr, "connection closed before the request line");
                None
            }
            Err(err) => {
                warn!(?client_addr, error = %err, "failed to parse request");
                None
            }
        };

        let target = req
            .as_ref()
            .map(|req| (req.method().clone(), req.path().to_owned()));
        let res = self.dispatch_request(req).await;
        if let Some((method, path)) = target {
            debug!(%method, %path, status = res.status().as_u16(), "request handled");
        }

        let mut conn = conn.writer().await;
        let written = if res.is_already_handled() {
            Ok(())
        } else {
            res.write(&mut **conn, self.config.send_file_buffer_size).await
        };
        let closed = conn.close().await;

        for result in [written, closed] {
            if let Err(err) = result {
                if !is_peer_gone(&err) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Produces the response for a parsed request, or the 400 response when
    /// `req` is `None`.
    pub async fn dispatch_request(&self, req: Option<Request>) -> Response {
        let Some(req) = req else {
            let res = self.status_response(StatusCode::BAD_REQUEST, None, &[]).await;
            return self.after_error(None, res, &[]).await;
        };

        let mut res = self.route_request(&req).await;
        res.set_head(*req.method() == Method::Head);
        res
    }

    async fn route_request(&self, req: &Request) -> Response {
        if req.content_length() > self.config.max_content_length {
            let res = self
                .status_response(StatusCode::PAYLOAD_TOO_LARGE, Some(req), &[])
                .await;
            return self.after_error(Some(req), res, &[]).await;
        }

        match self.find_route(req.method(), req.path()) {
            RouteMatch::Found { route, args } => {
                req.bind_route(args, route.url_prefix());
                match self.run_route(route, req).await {
                    Ok(res) => res,
                    Err(err) => {
                        let res = self.handle_error(req, err, &route.scopes).await;
                        self.after_error(Some(req), res, &route.scopes).await
                    }
                }
            }
            RouteMatch::Options(allow) => {
                let res = Response::new(StatusCode::OK).header("Allow", join_methods(&allow));
                self.after_error(Some(req), res, &[]).await
            }
            RouteMatch::MethodNotAllowed(methods) => {
                let res = match self.find_status_handler(StatusCode::METHOD_NOT_ALLOWED, &[]) {
                    Some(handler) => self.run_status_handler(handler, Some(req)).await,
                    None => builtin(StatusCode::METHOD_NOT_ALLOWED)
                        .header("Allow", join_methods(methods)),
                };
                self.after_error(Some(req), res, &[]).await
            }
            RouteMatch::NotFound => {
                let res = self
                    .status_response(StatusCode::NOT_FOUND, Some(req), &[])
                    .await;
                self.after_error(Some(req), res, &[]).await
            }
        }
    }

    /// Before hooks, handler, after hooks. Any error ends the chain.
    async fn run_route(&self, route: &Route, req: &Request) -> Result<Response, Error> {
        let scopes = &route.scopes;

        let mut early = None;
        for hook in self.chain(scopes, |set| &set.before) {
            let req = req.clone();
            if let Some(res) = guarded(|| hook(req)).await? {
                early = Some(res);
                break;
            }
        }

        let mut res = match early {
            Some(res) => res,
            None => {
                let req = req.clone();
                guarded(|| (route.handler)(req)).await?
            }
        };

        let request_hooks = req.after_request_hooks();
        for hook in self.chain(scopes, |set| &set.after).chain(request_hooks.iter()) {
            let req = req.clone();
            res = guarded(move || infallible(hook(req, res))).await?;
        }
        Ok(res)
    }

    async fn handle_error(&self, req: &Request, err: Error, scopes: &[Arc<HookSet>]) -> Response {
        if let Some(exc) = err.http_exception() {
            return match self.find_status_handler(exc.status, scopes) {
                Some(handler) => self.run_status_handler(handler, Some(req)).await,
                None => {
                    let mut res = Response::ok(exc.reason.clone());
                    res.set_status(exc.status);
                    res
                }
            };
        }

        error!(method = %req.method(), path = %req.path(), error = %err, "request failed");
        if let Some(handler) = self.find_exception_handler(&err, scopes) {
            let req = req.clone();
            match guarded(|| handler(req, err)).await {
                Ok(res) => return res,
                Err(err) => error!(error = %err, "exception handler failed"),
            }
        }
        self.status_response(StatusCode::INTERNAL_SERVER_ERROR, Some(req), scopes)
            .await
    }

    async fn after_error(
        &self,
        req: Option<&Request>,
        mut res: Response,
        scopes: &[Arc<HookSet>],
    ) -> Response {
        for hook in self.chain(scopes, |set| &set.after_error) {
            let req = req.cloned();
            res = match guarded(move || infallible(hook(req, res))).await {
                Ok(res) => res,
                Err(err) => {
                    error!(error = %err, "after-error hook failed");
                    builtin(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
        }
        res
    }

    async fn status_response(
        &self,
        status: StatusCode,
        req: Option<&Request>,
        scopes: &[Arc<HookSet>],
    ) -> Response {
        match self.find_status_handler(status, scopes) {
            Some(handler) => self.run_status_handler(handler, req).await,
            None => builtin(status),
        }
    }

    async fn run_status_handler(&self, handler: &StatusHandler, req: Option<&Request>) -> Response {
        let req = req.cloned();
        match guarded(|| handler(req)).await {
            Ok(res) => res,
            Err(err) => {
                error!(error = %err, "status handler failed");
                builtin(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Global hooks first, then each scope from the outermost mount inward.
    fn chain<'a, T: 'a>(
        &'a self,
        scopes: &'a [Arc<HookSet>],
        pick: fn(&HookSet) -> &Vec<T>,
    ) -> impl Iterator<Item = &'a T> + 'a {
        pick(&self.hooks)
            .iter()
            .chain(scopes.iter().flat_map(move |scope| pick(scope).iter()))
    }

    /// Innermost scope first, then the router's own handlers.
    fn find_status_handler<'a>(
        &'a self,
        status: StatusCode,
        scopes: &'a [Arc<HookSet>],
    ) -> Option<&'a StatusHandler> {
        scopes
            .iter()
            .rev()
            .find_map(|scope| scope.status_handler(status))
            .or_else(|| self.hooks.status_handler(status))
    }

    /// The handler for the most specific class in the error's lineage.
    fn find_exception_handler<'a>(
        &'a self,
        err: &Error,
        scopes: &'a [Arc<HookSet>],
    ) -> Option<&'a ExceptionHandler> {
        err.lineage().iter().find_map(|class| {
            scopes
                .iter()
                .rev()
                .find_map(|scope| scope.exception_handler(*class))
                .or_else(|| self.hooks.exception_handler(*class))
        })
    }
}
