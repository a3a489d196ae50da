use std::sync::Arc;

use anyhow::Context as _;
use tracing::debug;
use wasmtime::{Caller, Engine, Instance, Linker, Module, Store, TypedFunc};

use crate::errors::HarnessError;
use crate::events::Level;
use crate::host::{ConsoleProxy, ForeignTable};

/// Exports a module uses to hand the harness its last panic value.
const PANIC_PAYLOAD_EXPORT: &str = "last_panic_payload";
const PANIC_MESSAGE_EXPORT: &str = "last_panic_message";

/// Per-store state backing the capability imports.
pub struct HostState {
    pub console: Arc<ConsoleProxy>,
    pub refs: Arc<ForeignTable>,
}

/// A compiled module plus the capability imports it will be instantiated
/// with. Compilation happens once per run; instantiation once per test, so
/// no test can observe another's module-level state.
pub struct ModuleHost {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    console: Arc<ConsoleProxy>,
    refs: Arc<ForeignTable>,
}

impl ModuleHost {
    pub fn new(
        wasm_bytes: &[u8],
        console: Arc<ConsoleProxy>,
        refs: Arc<ForeignTable>,
    ) -> Result<Self, HarnessError> {
        let engine = Engine::default();
        let module = Module::new(&engine, wasm_bytes)
            .map_err(|err| HarnessError(format!("failed to compile module: {err:#}")))?;

        let mut linker = Linker::new(&engine);
        linker
            .func_wrap(
                "host",
                "log",
                |mut caller: Caller<'_, HostState>,
                 level: u32,
                 ptr: u32,
                 len: u32|
                 -> anyhow::Result<()> {
                    let line = read_string(&mut caller, ptr, len)?;
                    let console = Arc::clone(&caller.data().console);
                    console.emit(Level::from_raw(level), &line);
                    Ok(())
                },
            )
            .map_err(HarnessError::from)?;
        linker
            .func_wrap(
                "host",
                "str_ref",
                |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<i32> {
                    let value = read_string(&mut caller, ptr, len)?;
                    Ok(caller.data().refs.insert(value))
                },
            )
            .map_err(HarnessError::from)?;

        Ok(ModuleHost {
            engine,
            module,
            linker,
            console,
            refs,
        })
    }

    /// Create a fresh instance with its own store.
    pub fn instantiate(&self) -> Result<TestInstance, HarnessError> {
        debug!("instantiating fresh module instance");
        let mut store = Store::new(
            &self.engine,
            HostState {
                console: Arc::clone(&self.console),
                refs: Arc::clone(&self.refs),
            },
        );
        let instance = self
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|err| HarnessError(format!("failed to instantiate module: {err:#}")))?;
        Ok(TestInstance { store, instance })
    }
}

/// Decode a UTF-8 string the module passed by `(ptr, len)` out of its
/// exported memory. The host's string-decoding capability.
fn read_string(
    caller: &mut Caller<'_, HostState>,
    ptr: u32,
    len: u32,
) -> anyhow::Result<String> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .context("module does not export its memory")?;
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .context("string range overflows")?;
    let bytes = memory
        .data(&*caller)
        .get(start..end)
        .context("string range is out of bounds")?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// One instantiated module, bound to one test's execution.
pub struct TestInstance {
    store: Store<HostState>,
    instance: Instance,
}

impl TestInstance {
    /// Resolve a nullary test callable. `None` when the export is absent or
    /// has the wrong shape.
    pub fn lookup(&mut self, export: &str) -> Option<TypedFunc<(), ()>> {
        let func = self.instance.get_func(&mut self.store, export)?;
        func.typed::<(), ()>(&self.store).ok()
    }

    /// Invoke a test callable. A trap surfaces as the error.
    pub fn invoke(&mut self, func: &TypedFunc<(), ()>) -> anyhow::Result<()> {
        func.call(&mut self.store, ())
    }

    /// Read the module's panic accessors after a trap. Either handle is
    /// `None` when the accessor is missing or itself fails.
    pub fn panic_handles(&mut self) -> (Option<i32>, Option<i32>) {
        (
            self.accessor(PANIC_PAYLOAD_EXPORT),
            self.accessor(PANIC_MESSAGE_EXPORT),
        )
    }

    fn accessor(&mut self, name: &str) -> Option<i32> {
        let func = self.instance.get_func(&mut self.store, name)?;
        let func = func.typed::<(), i32>(&self.store).ok()?;
        func.call(&mut self.store, ()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
        (module
          (import "host" "log" (func $log (param i32 i32 i32)))
          (import "host" "str_ref" (func $str_ref (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "bad input: -1")
          (global $payload (mut i32) (i32.const -1))
          (global $message (mut i32) (i32.const -1))
          (func (export "add_ok"))
          (func (export "prints")
            (call $log (i32.const 4) (i32.const 0) (i32.const 9)))
          (func (export "boom")
            (global.set $payload (call $str_ref (i32.const 0) (i32.const 13)))
            (global.set $message (call $str_ref (i32.const 0) (i32.const 13)))
            unreachable)
          (func (export "last_panic_payload") (result i32) (global.get $payload))
          (func (export "last_panic_message") (result i32) (global.get $message))
        )
    "#;

    fn host() -> (ModuleHost, Arc<ConsoleProxy>, Arc<ForeignTable>) {
        let console = ConsoleProxy::new();
        let refs = ForeignTable::new();
        let host = ModuleHost::new(
            FIXTURE.as_bytes(),
            Arc::clone(&console),
            Arc::clone(&refs),
        )
        .unwrap();
        (host, console, refs)
    }

    #[test]
    fn lookup_finds_tests_and_rejects_missing_exports() {
        let (host, _, _) = host();
        let mut instance = host.instantiate().unwrap();
        assert!(instance.lookup("add_ok").is_some());
        assert!(instance.lookup("no_such_test").is_none());
        // Wrong shape: the memory export is not a nullary function.
        assert!(instance.lookup("memory").is_none());
    }

    #[test]
    fn a_trapping_test_leaves_its_panic_text_in_the_table() {
        let (host, _, refs) = host();
        let mut instance = host.instantiate().unwrap();
        let func = instance.lookup("boom").unwrap();
        assert!(instance.invoke(&func).is_err());

        let (payload, message) = instance.panic_handles();
        assert_eq!(refs.resolve(payload.unwrap()), "bad input: -1");
        assert_eq!(refs.resolve(message.unwrap()), "bad input: -1");
        assert_eq!(refs.live(), 0);
    }

    #[test]
    fn logged_lines_flow_through_the_console_capability() {
        let (host, console, _) = host();
        let (tx, rx) = std::sync::mpsc::channel();
        let guard = console
            .begin(
                Box::new(move |line, _, level| {
                    tx.send((line.to_string(), level)).unwrap();
                }),
                false,
            )
            .unwrap();

        let mut instance = host.instantiate().unwrap();
        let func = instance.lookup("prints").unwrap();
        instance.invoke(&func).unwrap();
        drop(guard);

        let lines: Vec<_> = rx.try_iter().collect();
        assert_eq!(lines, vec![("bad input".to_string(), Level::Error)]);
    }

    #[test]
    fn accessors_missing_from_a_module_yield_no_handles() {
        let wat = "(module (func (export \"add_ok\")))";
        let host =
            ModuleHost::new(wat.as_bytes(), ConsoleProxy::new(), ForeignTable::new()).unwrap();
        let mut instance = host.instantiate().unwrap();
        assert_eq!(instance.panic_handles(), (None, None));
    }
}
