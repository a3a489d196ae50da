use std::sync::{Arc, Mutex};

use crate::errors::HarnessError;
use crate::events::{Level, Stream};

type Hook = Box<dyn FnMut(&str, Stream, Level) + Send>;

/// The process logging surface supplied to module instances. Every line a
/// test logs arrives here, tagged with its severity.
///
/// A capture scope redirects lines to a hook instead of the real streams;
/// the installed hook doubles as the guard flag, so at most one scope can be
/// open at a time. The scope is a [`CaptureGuard`] that restores the prior
/// behavior on drop, whether or not the test body trapped.
pub struct ConsoleProxy {
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    hook: Option<Hook>,
    forward: bool,
}

impl ConsoleProxy {
    pub fn new() -> Arc<Self> {
        Arc::new(ConsoleProxy {
            slot: Mutex::new(Slot::default()),
        })
    }

    /// Route one logged line. Captured lines go to the hook (and also to the
    /// real streams when forwarding); uncaptured lines go straight through.
    pub fn emit(&self, level: Level, line: &str) {
        let slot = &mut *self.slot.lock().unwrap();
        let Slot { hook, forward } = slot;
        match hook.as_mut() {
            Some(hook) => {
                hook(line, level.stream(), level);
                if *forward {
                    Self::write_base(level, line);
                }
            }
            None => Self::write_base(level, line),
        }
    }

    fn write_base(level: Level, line: &str) {
        match level.stream() {
            Stream::Stdout => println!("{line}"),
            Stream::Stderr => eprintln!("{line}"),
        }
    }

    /// Open a capture scope. Errors if one is already open.
    pub fn begin(
        self: &Arc<Self>,
        hook: Hook,
        forward: bool,
    ) -> Result<CaptureGuard, HarnessError> {
        let mut slot = self.slot.lock().unwrap();
        if slot.hook.is_some() {
            return Err(HarnessError(
                "a console capture is already active".to_string(),
            ));
        }
        slot.hook = Some(hook);
        slot.forward = forward;
        Ok(CaptureGuard {
            proxy: Arc::clone(self),
        })
    }
}

/// Open capture scope. Dropping it restores the console unconditionally.
pub struct CaptureGuard {
    proxy: Arc<ConsoleProxy>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.proxy.slot.lock() {
            slot.hook = None;
            slot.forward = false;
        }
    }
}
