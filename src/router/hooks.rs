//! Hook chains and error handlers of one router, or of one locally mounted
//! sub-router.

use std::any::TypeId;

use super::handler::{AfterErrorHook, AfterHook, BeforeHook, ExceptionHandler, StatusHandler};
use crate::http::StatusCode;

#[derive(Clone, Default)]
pub(crate) struct HookSet {
    pub(crate) before: Vec<BeforeHook>,
    pub(crate) after: Vec<AfterHook>,
    pub(crate) after_error: Vec<AfterErrorHook>,
    status_handlers: Vec<(StatusCode, StatusHandler)>,
    exception_handlers: Vec<(TypeId, ExceptionHandler)>,
}

impl HookSet {
    /// Registers a status handler, replacing any previous one for `status`.
    pub(crate) fn set_status_handler(&mut self, status: StatusCode, handler: StatusHandler) {
        match self.status_handlers.iter_mut().find(|(s, _)| *s == status) {
            Some(slot) => slot.1 = handler,
            None => self.status_handlers.push((status, handler)),
        }
    }

    /// Registers an error-class handler, replacing any previous one for `class`.
    pub(crate) fn set_exception_handler(&mut self, class: TypeId, handler: ExceptionHandler) {
        match self.exception_handlers.iter_mut().find(|(c, _)| *c == class) {
            Some(slot) => slot.1 = handler,
            None => self.exception_handlers.push((class, handler)),
        }
    }

    pub(crate) fn status_handler(&self, status: StatusCode) -> Option<&StatusHandler> {
        self.status_handlers
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, h)| h)
    }

    pub(crate) fn exception_handler(&self, class: TypeId) -> Option<&ExceptionHandler> {
        self.exception_handlers
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, h)| h)
    }

    /// Splices `other` into this set: hooks are appended after the existing
    /// ones, error handlers from `other` take over their status or class.
    pub(crate) fn extend(&mut self, other: HookSet) {
        self.before.extend(other.before);
        self.after.extend(other.after);
        self.after_error.extend(other.after_error);
        for (status, handler) in other.status_handlers {
            self.set_status_handler(status, handler);
        }
        for (class, handler) in other.exception_handlers {
            self.set_exception_handler(class, handler);
        }
    }
}
