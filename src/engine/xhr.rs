//! XHR breakpoints: pausing when script-initiated network requests open.

use crate::engine::ThreadExecutionEngine;
use crate::engine::pause::{PauseReason, PauseVerdict};
use crate::engine::step::HookAction;
use crate::runtime::RuntimeHookProvider;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Matches any request method.
pub const METHOD_ANY: &str = "ANY";

/// One armed XHR breakpoint: pause when a request whose URL contains `path`
/// opens with a matching method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XhrBreakpoint {
    pub path: String,
    /// HTTP method, or [`METHOD_ANY`] for a wildcard.
    pub method: String,
}

impl XhrBreakpoint {
    fn matches(&self, request: &OpeningRequest) -> bool {
        let method_matches =
            self.method == METHOD_ANY || self.method.eq_ignore_ascii_case(&request.method);
        method_matches && request.url.contains(&self.path)
    }
}

/// How the runtime classified the initiator of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RequestCause {
    Xhr,
    Fetch,
    /// Page loads, images, stylesheets and other non-script requests.
    Other,
}

/// A network request observed at open time.
#[derive(Debug, Clone)]
pub struct OpeningRequest {
    pub url: String,
    pub method: String,
    pub cause: RequestCause,
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    /// Arm an XHR breakpoint. Duplicate (path, method) pairs are rejected;
    /// returns whether the entry was added.
    pub fn set_xhr_breakpoint(&self, path: String, method: String) -> bool {
        {
            let mut list = self.xhr_breakpoints.borrow_mut();
            let duplicate = list
                .iter()
                .any(|bp| bp.path == path && bp.method == method);
            if duplicate {
                return false;
            }
            list.push(XhrBreakpoint { path, method });
        }
        self.update_network_observer();
        true
    }

    /// Disarm one XHR breakpoint; returns whether it existed.
    pub fn remove_xhr_breakpoint(&self, path: &str, method: &str) -> bool {
        let removed = {
            let mut list = self.xhr_breakpoints.borrow_mut();
            let before = list.len();
            list.retain(|bp| bp.path != path || bp.method != method);
            list.len() != before
        };
        self.update_network_observer();
        removed
    }

    pub fn remove_all_xhr_breakpoints(&self) {
        self.xhr_breakpoints.borrow_mut().clear();
        self.update_network_observer();
    }

    pub fn xhr_breakpoints(&self) -> Vec<XhrBreakpoint> {
        self.xhr_breakpoints.borrow().clone()
    }

    /// The network-open observer runs iff at least one entry is armed.
    pub(crate) fn update_network_observer(&self) {
        self.runtime
            .observe_network(!self.xhr_breakpoints.borrow().is_empty());
    }

    /// Network observer callback: a request is opening.
    pub fn on_opening_request(&self, request: &OpeningRequest) -> HookAction {
        if request.cause == RequestCause::Other {
            return HookAction::Continue;
        }
        if self.breaks_disabled() {
            return HookAction::Continue;
        }
        let matched = self
            .xhr_breakpoints
            .borrow()
            .iter()
            .any(|bp| bp.matches(request));
        if !matched {
            return HookAction::Continue;
        }

        // Background loads with no script on the stack never pause.
        let Some(frame) = self.runtime.newest_frame() else {
            return HookAction::Continue;
        };
        if self.sources.is_frame_blackboxed(frame) {
            return HookAction::Continue;
        }

        match self.pause_and_respond(Some(frame), PauseReason::Xhr, None) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }
}
