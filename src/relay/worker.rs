//! The run body every worker context shares: execute the tests where the
//! worker lives, render the report there, and post the results back.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::HarnessError;
use crate::events::{Event, RelayMessage};
use crate::executor::Executor;
use crate::printer::TextFormatter;
use crate::relay::RunJob;

/// Run the job, posting `line` and `user-output` messages as they are
/// produced and exactly one terminal `report`. Any in-context failure
/// becomes a synthesized single-failure report; the controller never hangs
/// on a worker that died trying.
pub(crate) fn serve(job: &RunJob, post: &dyn Fn(RelayMessage)) {
    match try_serve(job, post) {
        Ok(report) => post(report),
        Err(err) => post(RelayMessage::Report {
            lines: Some(vec![err.to_string()]),
            failed: 1,
        }),
    }
}

fn try_serve(job: &RunJob, post: &dyn Fn(RelayMessage)) -> Result<RelayMessage, HarnessError> {
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
    let mut formatter = TextFormatter::new(job.nocapture, move |line: &str, _stream| {
        rendered.borrow_mut().push(line.to_string());
        post(RelayMessage::Line {
            line: line.to_string(),
        });
    });

    // With capture off the rendered stream already carries every output
    // line; forwarding it again would print twice on the controller.
    let forward_output = !job.nocapture;
    let mut emit = |event: Event| {
        if forward_output {
            if let Event::TestOutput {
                line, stream, level, ..
            } = &event
            {
                post(RelayMessage::UserOutput {
                    line: line.clone(),
                    stream: *stream,
                    level: *level,
                });
            }
        }
        formatter.on_event(&event);
    };

    let result = executor.run(&job.tests, job.filtered, &mut emit)?;

    let lines = lines.borrow().clone();
    Ok(RelayMessage::Report {
        lines: Some(lines),
        failed: result.failed,
    })
}
