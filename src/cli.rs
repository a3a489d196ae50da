use std::path::PathBuf;

use structopt::StructOpt;

use crate::errors::HarnessError;
use crate::relay::ContextKind;

/// Options for the CLI.
#[derive(StructOpt, Debug)]
#[structopt(
    name = "modtest",
    about = "Cross-environment test harness for WebAssembly test modules."
)]
pub struct Opts {
    /// Test module to execute.
    #[structopt(name = "MODULE", parse(from_os_str))]
    pub module: PathBuf,

    /// Run only tests whose names contain one of these strings.
    #[structopt(name = "FILTER")]
    pub filters: Vec<String>,

    /// JSON test manifest. Defaults to the manifest embedded in the module.
    #[structopt(short, long, parse(from_os_str))]
    pub manifest: Option<PathBuf>,

    /// Require name filters to match exactly.
    #[structopt(long)]
    pub exact: bool,

    /// Run only tests marked ignored.
    #[structopt(long)]
    pub ignored: bool,

    /// Run only tests whose names match this regex.
    #[structopt(short, long)]
    pub include: Option<String>,

    /// Skip tests whose names match this regex.
    #[structopt(short = "x", long)]
    pub exclude: Option<String>,

    /// Print test output live instead of capturing it.
    #[structopt(long)]
    pub nocapture: bool,

    /// List the tests without running them.
    #[structopt(long)]
    pub list: bool,

    /// Listing format.
    #[structopt(long, default_value = "standard")]
    pub format: ListFormat,

    /// Host context to run in (in-process, dedicated, shared, lifecycle,
    /// process). Defaults to MODTEST_CONTEXT, then in-process.
    #[structopt(short, long)]
    pub context: Option<ContextKind>,

    /// Make the worker process report over HTTP instead of its stdout.
    /// Only meaningful with the process context.
    #[structopt(long)]
    pub http_report: bool,
}

impl Opts {
    /// Resolve the host context: flag first, then environment, then the
    /// in-process default.
    pub fn context(&self) -> Result<ContextKind, HarnessError> {
        if let Some(kind) = self.context {
            return Ok(kind);
        }
        match std::env::var("MODTEST_CONTEXT") {
            Ok(value) => value.parse(),
            Err(_) => Ok(ContextKind::InProcess),
        }
    }
}

/// Possible values for the --format flag.
#[derive(Debug)]
pub enum ListFormat {
    Standard,
    Terse,
}

impl std::str::FromStr for ListFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(ListFormat::Standard),
            "terse" => Ok(ListFormat::Terse),
            _ => Err(HarnessError(
                "must be one of standard, terse.".to_string(),
            )),
        }
    }
}
