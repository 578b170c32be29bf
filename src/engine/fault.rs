use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Once;
use thiserror::Error;

//a captured strategy failure: what went wrong, where, and through which calls
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct Fault {
    pub message: String,
    pub location: Option<String>,
    pub trace: Vec<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Fault {
            message: message.into(),
            location: None,
            trace: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    //builds a fault at the caller's position with the current stack,
    //for strategies that want to fail with a precise location
    #[track_caller]
    pub fn raise(message: impl Into<String>) -> Self {
        let caller = Location::caller();
        Fault::new(message)
            .with_location(format!("{}:{}:{}", caller.file(), caller.line(), caller.column()))
            .with_trace(render_backtrace(&Backtrace::force_capture()))
    }

    //converts an error returned by a strategy, keeping an embedded fault as-is
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(fault) = err.downcast_ref::<Fault>() {
            return fault.clone();
        }

        let mut trace: Vec<String> = err
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {}", cause))
            .collect();
        let backtrace = err.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            trace.extend(render_backtrace(backtrace));
        }
        Fault::new(err.to_string()).with_trace(trace)
    }

    //human-readable multi-line report
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        if let Some(location) = &self.location {
            let _ = write!(out, "\n  at {}", location);
        }
        for frame in &self.trace {
            let _ = write!(out, "\n    {}", frame);
        }
        out
    }
}

thread_local! {
    //true while this thread is inside a guarded strategy call
    static GUARDED: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<Fault>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

//panics from guarded threads are recorded silently, all others go to the previous hook
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARDED.with(Cell::get) {
                let mut fault = Fault::new(payload_message(info.payload()))
                    .with_trace(render_backtrace(&Backtrace::force_capture()));
                if let Some(location) = info.location() {
                    fault = fault.with_location(format!(
                        "{}:{}:{}",
                        location.file(),
                        location.line(),
                        location.column()
                    ));
                }
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(fault));
            } else {
                previous(info);
            }
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked with a non-string payload".to_string()
    }
}

fn render_backtrace(backtrace: &Backtrace) -> Vec<String> {
    backtrace
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

//runs `f` behind a fault boundary: errors and panics both come back as a fault
pub fn guard<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, Fault> {
    install_hook();
    //a panic the callee caught itself must not be reported later
    LAST_PANIC.with(|slot| slot.borrow_mut().take());
    let was_guarded = GUARDED.with(|g| g.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    GUARDED.with(|g| g.set(was_guarded));

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Fault::from_error(&err)),
        Err(payload) => Err(LAST_PANIC
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Fault::new(payload_message(payload.as_ref())))),
    }
}
