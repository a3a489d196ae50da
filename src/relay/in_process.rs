//! The in-process adapter: no relay at all. The executor's events are
//! consumed synchronously by a local formatter writing to the real streams.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::HarnessError;
use crate::events::{Event, Stream};
use crate::executor::Executor;
use crate::printer::TextFormatter;
use crate::relay::{RelayReport, RunJob};

pub fn run(job: &RunJob) -> Result<RelayReport, HarnessError> {
    let wasm_bytes = std::fs::read(&job.module).map_err(|err| {
        HarnessError(format!(
            "failed to read module {}: {}",
            job.module.display(),
            err
        ))
    })?;
    let executor = Executor::new(&wasm_bytes)?;

    let lines = Rc::new(RefCell::new(Vec::new()));
    let rendered = Rc::clone(&lines);
    let mut formatter = TextFormatter::new(job.nocapture, move |line: &str, stream| {
        rendered.borrow_mut().push(line.to_string());
        match stream {
            Stream::Stdout => println!("{line}"),
            Stream::Stderr => eprintln!("{line}"),
        }
    });

    let mut emit = |event: Event| formatter.on_event(&event);
    let result = executor.run(&job.tests, job.filtered, &mut emit)?;

    let lines = lines.borrow().clone();
    Ok(RelayReport {
        lines,
        failed: result.failed,
    })
}
