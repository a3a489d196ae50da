use modtest::{
    cli::{self, ListFormat},
    errors::HarnessError,
    picker::{self, Filters, TestDescriptor},
    relay::{self, RunJob},
};

use cli::Opts;
use regex::Regex;
use structopt::StructOpt;
use tokio::runtime;

fn list(tests: &[TestDescriptor], format: &ListFormat) {
    for test in tests {
        println!("{}: test", test.name);
    }
    if let ListFormat::Standard = format {
        println!();
        println!("{} tests, 0 benchmarks", tests.len());
    }
}

fn empty_summary(filtered: usize) {
    use colored::*;
    println!();
    println!("running 0 tests");
    println!();
    println!(
        "test result: {}. 0 passed; 0 failed; 0 ignored; 0 measured; {} filtered out; finished in 0.00s",
        "ok".green(),
        filtered
    );
    println!();
}

fn run() -> Result<i32, HarnessError> {
    // A worker-role process is configured by its environment, not by args.
    if relay::process::is_child() {
        return relay::process::child_main();
    }

    let opts = Opts::from_args();

    let wasm_bytes = std::fs::read(&opts.module).map_err(|err| {
        HarnessError(format!(
            "failed to read module {}: {}",
            opts.module.display(),
            err
        ))
    })?;
    let mut tests = match &opts.manifest {
        Some(path) => picker::json::from_path(path)?,
        None => picker::section::from_module_bytes(&wasm_bytes)?,
    };

    let include = opts
        .include
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|err| HarnessError(format!("invalid --include regex: {err}")))?;
    let exclude = opts
        .exclude
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|err| HarnessError(format!("invalid --exclude regex: {err}")))?;

    let filtered = picker::apply_filters(
        &mut tests,
        &Filters {
            names: &opts.filters,
            exact: opts.exact,
            ignored_only: opts.ignored,
            include: include.as_ref(),
            exclude: exclude.as_ref(),
        },
    );

    if opts.list {
        list(&tests, &opts.format);
        return Ok(0);
    }

    if tests.is_empty() {
        empty_summary(filtered);
        return Ok(0);
    }

    let kind = opts.context()?;
    let job = RunJob {
        module: opts.module.clone(),
        tests,
        filtered,
        nocapture: opts.nocapture,
    };

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get())
        .build()
        .unwrap();

    let report = runtime.block_on(relay::launch(kind, job, opts.http_report));
    Ok(if report.failed == 0 { 0 } else { 1 })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(match run() {
        Err(HarnessError(msg)) => {
            println!("error: {}", msg);
            1
        }
        Ok(code) => code,
    })
}
