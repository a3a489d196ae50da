//! JSON manifest picker. The build step serializes the declared tests as an
//! ordered JSON array; order is preserved all the way into the report.

use std::path::Path;

use crate::errors::HarnessError;
use crate::picker::TestDescriptor;

/// Load a manifest from a `tests.json`-style file.
pub fn from_path(path: &Path) -> Result<Vec<TestDescriptor>, HarnessError> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        HarnessError(format!("failed to read manifest {}: {}", path.display(), err))
    })?;
    from_str(&contents)
        .map_err(|err| HarnessError(format!("failed to parse {}: {}", path.display(), err)))
}

/// Parse a manifest from its JSON text.
pub fn from_str(contents: &str) -> Result<Vec<TestDescriptor>, HarnessError> {
    Ok(serde_json::from_str(contents)?)
}
