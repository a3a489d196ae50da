//! A picker gathers the tests a run will execute: it loads the manifest the
//! module's build step produced and applies the pre-engine name filters.
//! Filtered-out tests never reach the execution engine; only their count is
//! reported.

pub mod json;
pub mod section;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One discoverable test, as declared by the module's build step.
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDescriptor {
    /// Display identifier used in the report.
    pub name: String,
    /// Export to invoke. Defaults to `name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<String>,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_reason: Option<String>,
    #[serde(default)]
    pub should_panic: bool,
    /// Substring the panic text must contain for a should-panic test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_panic_reason: Option<String>,
}

impl TestDescriptor {
    pub fn export_name(&self) -> &str {
        self.export.as_deref().unwrap_or(&self.name)
    }
}

/// Name filters applied before the run. Matched against the test name.
#[derive(Debug, Default)]
pub struct Filters<'a> {
    /// Positional substring filters; a test survives if any matches.
    pub names: &'a [String],
    /// Require positional filters to match the whole name.
    pub exact: bool,
    /// Keep only tests marked ignored.
    pub ignored_only: bool,
    pub include: Option<&'a Regex>,
    pub exclude: Option<&'a Regex>,
}

/// Remove tests that do not survive the filters and return how many were
/// dropped. The surviving order is the manifest order.
pub fn apply_filters(tests: &mut Vec<TestDescriptor>, filters: &Filters) -> usize {
    let initial = tests.len();
    tests.retain(|test| {
        let matches_ignore = !filters.ignored_only || test.ignore;
        let matches_name = if filters.names.is_empty() {
            true
        } else if filters.exact {
            filters.names.contains(&test.name)
        } else {
            filters.names.iter().any(|f| test.name.contains(f.as_str()))
        };
        let matches_include = filters.include.map_or(true, |re| re.is_match(&test.name));
        let matches_exclude = filters.exclude.map_or(true, |re| !re.is_match(&test.name));
        matches_ignore && matches_name && matches_include && matches_exclude
    });
    initial - tests.len()
}
