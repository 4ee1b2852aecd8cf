//! The error type handlers, hooks and the dispatcher share.
//!
//! Handlers return `Result<_, Error>`. Any type implementing [`ErrorClass`]
//! converts into [`Error`] with `?`, and keeps its class lineage so the router
//! can find the nearest registered exception handler: exact class first, then
//! each ancestor in declaration order.

use std::any::{Any, TypeId};
use std::error::Error as StdError;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::http::StatusCode;

/// An error class that exception handlers can be registered for.
///
/// `ancestors` lists the classes this one specializes, nearest first. A
/// handler registered for an ancestor catches this class when no handler for
/// the class itself exists.
///
/// # Examples
///
/// ```
/// use std::any::TypeId;
/// use picodot::ErrorClass;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("arithmetic error")]
/// struct ArithmeticError;
/// impl ErrorClass for ArithmeticError {}
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("division by zero")]
/// struct ZeroDivision;
/// impl ErrorClass for ZeroDivision {
///     fn ancestors() -> Vec<TypeId> {
///         vec![TypeId::of::<ArithmeticError>()]
///     }
/// }
/// ```
pub trait ErrorClass: StdError + Send + Sync + 'static {
    fn ancestors() -> Vec<TypeId>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// A type-erased handler error that remembers its class lineage.
///
/// The lineage always ends with `TypeId::of::<Error>()`, so an exception
/// handler registered for `Error` itself catches every class.
pub struct Error {
    inner: Box<dyn StdError + Send + Sync>,
    lineage: Vec<TypeId>,
}

impl Error {
    pub fn new<E: ErrorClass>(err: E) -> Self {
        let mut lineage = vec![TypeId::of::<E>()];
        lineage.extend(E::ancestors());
        lineage.push(TypeId::of::<Error>());
        Self {
            inner: Box::new(err),
            lineage,
        }
    }

    /// The class chain used for exception-handler lookup, most specific first.
    pub fn lineage(&self) -> &[TypeId] {
        &self.lineage
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Returns the [`HttpException`] raised with [`abort`], if this is one.
    pub fn http_exception(&self) -> Option<&HttpException> {
        self.downcast_ref::<HttpException>()
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }
}

impl<E: ErrorClass> From<E> for Error {
    fn from(err: E) -> Self {
        Error::new(err)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl AsRef<dyn StdError + Send + Sync> for Error {
    fn as_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

/// An HTTP error raised from a handler with [`abort`].
///
/// Routed to the status handler for `status`; without one the response is
/// the reason text with that status.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct HttpException {
    pub status: StatusCode,
    pub reason: String,
}

impl HttpException {
    pub fn new(status: impl Into<StatusCode>, reason: Option<String>) -> Self {
        let status = status.into();
        let reason = reason.unwrap_or_else(|| format!("{} error", status.as_u16()));
        Self { status, reason }
    }
}

impl ErrorClass for HttpException {}

/// Stops the current request with an HTTP error.
///
/// # Examples
///
/// ```
/// use picodot::{Error, Request, abort};
///
/// async fn admin_only(req: Request) -> Result<&'static str, Error> {
///     if req.headers().get("X-Admin").is_none() {
///         return Err(abort(403));
///     }
///     Ok("welcome")
/// }
/// ```
pub fn abort(status: impl Into<StatusCode>) -> Error {
    HttpException::new(status, None).into()
}

/// Like [`abort`], with a custom reason used as the default response body.
pub fn abort_with(status: impl Into<StatusCode>, reason: impl Into<String>) -> Error {
    HttpException::new(status, Some(reason.into())).into()
}

/// A handler or hook panicked. Handled on the error path like any other error.
#[derive(Debug, Clone, Error)]
#[error("handler panicked: {message}")]
pub struct HandlerPanic {
    pub message: String,
}

impl HandlerPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { message }
    }
}

impl ErrorClass for HandlerPanic {}

impl ErrorClass for std::io::Error {}
impl ErrorClass for ParseIntError {}
impl ErrorClass for ParseFloatError {}
impl ErrorClass for Utf8Error {}
impl ErrorClass for FromUtf8Error {}
impl ErrorClass for serde_json::Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("lookup")]
    struct LookupError;
    impl ErrorClass for LookupError {}

    #[derive(Debug, Error)]
    #[error("key")]
    struct KeyError;
    impl ErrorClass for KeyError {
        fn ancestors() -> Vec<TypeId> {
            vec![TypeId::of::<LookupError>()]
        }
    }

    #[test]
    fn lineage_is_exact_then_ancestors_then_any() {
        let err: Error = KeyError.into();
        assert_eq!(
            err.lineage(),
            &[
                TypeId::of::<KeyError>(),
                TypeId::of::<LookupError>(),
                TypeId::of::<Error>()
            ]
        );
        assert!(err.is::<KeyError>());
    }

    #[test]
    fn abort_default_reason() {
        let err = abort(404);
        let exc = err.http_exception().unwrap();
        assert_eq!(exc.status, StatusCode::NOT_FOUND);
        assert_eq!(exc.reason, "404 error");
        assert_eq!(abort_with(401, "nope").to_string(), "nope");
    }

    #[test]
    fn question_mark_converts() {
        fn parse(s: &str) -> Result<i32, Error> {
            Ok(s.parse::<i32>()?)
        }
        assert!(parse("x").unwrap_err().is::<ParseIntError>());
    }

    #[test]
    fn panic_payloads() {
        let p = HandlerPanic::from_payload(Box::new("boom"));
        assert_eq!(p.message, "boom");
        let p = HandlerPanic::from_payload(Box::new(String::from("bang")));
        assert_eq!(p.message, "bang");
    }
}
