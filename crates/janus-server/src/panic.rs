//! Panic capture for supervised calls.
//!
//! `catch_unwind` only hands back the panic payload. To log a stack trace
//! and location with the request context, a process-wide panic hook records
//! them into a thread-local while a supervised future is being polled. Panics
//! outside supervision fall through to the previously installed hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::PanicHookInfo;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

thread_local! {
    static SUPERVISED: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

struct Captured {
    location: Option<String>,
    backtrace: Backtrace,
}

/// A recovered panic, ready to be logged.
#[derive(Debug)]
pub struct PanicReport {
    /// The panic message, when the payload is a string.
    pub message: String,
    /// `file:line:column` of the panic, when known.
    pub location: Option<String>,
    /// Stack trace captured at the panic site.
    pub backtrace: Option<String>,
}

impl PanicReport {
    /// Builds a report from a `catch_unwind` payload and whatever the hook
    /// captured on this thread.
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let captured = CAPTURED.with(|slot| slot.borrow_mut().take());
        Self {
            message: panic_message(payload),
            location: captured.as_ref().and_then(|c| c.location.clone()),
            backtrace: captured.map(|c| c.backtrace.to_string()),
        }
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Installs the capturing hook once per process.
pub(crate) fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if SUPERVISED.with(Cell::get) {
                let captured = Captured {
                    location: info.location().map(ToString::to_string),
                    backtrace: Backtrace::force_capture(),
                };
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(captured));
            } else {
                previous(info);
            }
        }));
    });
}

/// Future wrapper that marks the polling thread as supervised.
pub(crate) struct Capture<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Capture<F> {
    pub(crate) fn new(inner: F) -> Self {
        install_hook();
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for Capture<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _flag = SupervisedFlag::set();
        self.inner.as_mut().poll(cx)
    }
}

struct SupervisedFlag {
    prev: bool,
}

impl SupervisedFlag {
    fn set() -> Self {
        Self {
            prev: SUPERVISED.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for SupervisedFlag {
    fn drop(&mut self) {
        SUPERVISED.with(|flag| flag.set(self.prev));
    }
}
