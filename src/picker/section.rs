//! Embedded manifest picker. A module producer can carry the test manifest
//! inside the binary itself, as a `modtest.tests` custom section, so a lone
//! `.wasm` file is a complete test suite.
//!
//! Entry layout: `[u32le length][ignore][should-panic][name bytes]`, where
//! the length covers everything after itself. The two flag fields encode an
//! optional-optional string: `[0]` absent, `[1]` set without a reason,
//! `[2][u32le][bytes]` set with a reason.

use wasmparser::{Parser, Payload};

use crate::errors::HarnessError;
use crate::picker::TestDescriptor;

pub const SECTION_NAME: &str = "modtest.tests";

/// Extract the embedded manifest from a module's bytes. A module without the
/// section declares no tests.
pub fn from_module_bytes(wasm_bytes: &[u8]) -> Result<Vec<TestDescriptor>, HarnessError> {
    let mut tests = Vec::new();

    for payload in Parser::new(0).parse_all(wasm_bytes) {
        let payload =
            payload.map_err(|err| HarnessError(format!("failed to parse module: {err}")))?;
        if let Payload::CustomSection(section) = payload {
            if section.name() == SECTION_NAME {
                decode(section.data(), &mut tests)?;
            }
        }
    }

    Ok(tests)
}

fn decode(data: &[u8], tests: &mut Vec<TestDescriptor>) -> Result<(), HarnessError> {
    let mut offset = 0;

    while offset < data.len() {
        let len = read_u32(data, offset)? as usize;
        offset += 4;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(malformed)?;

        let (ignore, next) = read_opt_opt_string(data, offset, end)?;
        let (should_panic, next) = read_opt_opt_string(data, next, end)?;

        let name = std::str::from_utf8(data.get(next..end).ok_or_else(malformed)?)
            .map_err(|_| HarnessError(format!("test name in {SECTION_NAME} is not utf-8")))?;

        tests.push(TestDescriptor {
            name: name.to_string(),
            export: None,
            ignore: ignore.is_some(),
            ignore_reason: ignore.flatten(),
            should_panic: should_panic.is_some(),
            should_panic_reason: should_panic.flatten(),
        });

        offset = end;
    }

    Ok(())
}

type OptOptString = Option<Option<String>>;

fn read_opt_opt_string(
    data: &[u8],
    offset: usize,
    end: usize,
) -> Result<(OptOptString, usize), HarnessError> {
    let flag = *data.get(offset).filter(|_| offset < end).ok_or_else(malformed)?;
    let offset = offset + 1;
    match flag {
        0 => Ok((None, offset)),
        1 => Ok((Some(None), offset)),
        2 => {
            let len = read_u32(data, offset)? as usize;
            let start = offset + 4;
            let stop = start
                .checked_add(len)
                .filter(|stop| *stop <= end)
                .ok_or_else(malformed)?;
            let value = std::str::from_utf8(&data[start..stop])
                .map_err(|_| HarnessError(format!("reason in {SECTION_NAME} is not utf-8")))?;
            Ok((Some(Some(value.to_string())), stop))
        }
        _ => Err(malformed()),
    }
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, HarnessError> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(malformed)?
        .try_into()
        .map_err(|_| malformed())?;
    Ok(u32::from_le_bytes(bytes))
}

fn malformed() -> HarnessError {
    HarnessError(format!("malformed {SECTION_NAME} section"))
}

/// Encode descriptors into the section payload. The counterpart of
/// [`from_module_bytes`] for module producers and fixtures.
pub fn encode(tests: &[TestDescriptor]) -> Vec<u8> {
    let mut out = Vec::new();
    for test in tests {
        let mut entry = Vec::new();
        write_opt_opt_string(&mut entry, test.ignore, test.ignore_reason.as_deref());
        write_opt_opt_string(
            &mut entry,
            test.should_panic,
            test.should_panic_reason.as_deref(),
        );
        entry.extend_from_slice(test.name.as_bytes());

        out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        out.extend_from_slice(&entry);
    }
    out
}

fn write_opt_opt_string(out: &mut Vec<u8>, set: bool, reason: Option<&str>) {
    match (set, reason) {
        (false, _) => out.push(0),
        (true, None) => out.push(1),
        (true, Some(reason)) => {
            out.push(2);
            out.extend_from_slice(&(reason.len() as u32).to_le_bytes());
            out.extend_from_slice(reason.as_bytes());
        }
    }
}
