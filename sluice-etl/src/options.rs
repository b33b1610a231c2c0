//! Job argument resolution
//!
//! Glue passes job arguments as `--KEY value` pairs; `--KEY=value` is
//! accepted too. When a key repeats, the last occurrence wins.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Missing required job argument: --{0}")]
    MissingOption(String),
    #[error("Job argument --{0} has no value")]
    MissingValue(String),
}

/// Resolves the named options from `args` (program name excluded)
///
/// Unknown arguments are ignored, since the job runtime adds its own.
pub fn resolve_options<S: AsRef<str>>(
    args: &[S],
    required: &[&str],
) -> Result<BTreeMap<String, String>, OptionsError> {
    let parsed = parse_args(args);
    let mut resolved = BTreeMap::new();

    for name in required {
        match parsed.get(*name) {
            Some(Some(value)) => {
                resolved.insert(name.to_string(), value.clone());
            }
            Some(None) => return Err(OptionsError::MissingValue(name.to_string())),
            None => return Err(OptionsError::MissingOption(name.to_string())),
        }
    }
    Ok(resolved)
}

/// Value of an option that may be absent
pub fn optional_option<S: AsRef<str>>(args: &[S], name: &str) -> Option<String> {
    parse_args(args).remove(name).flatten()
}

fn parse_args<S: AsRef<str>>(args: &[S]) -> BTreeMap<String, Option<String>> {
    let mut parsed = BTreeMap::new();
    let mut iter = args.iter().map(AsRef::as_ref).peekable();

    while let Some(arg) = iter.next() {
        let Some(flag) = arg.strip_prefix("--") else {
            continue;
        };

        let (key, value) = match flag.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => {
                let value = iter
                    .next_if(|next| !next.starts_with("--"))
                    .map(str::to_string);
                (flag, value)
            }
        };
        parsed.insert(key.to_string(), value);
    }
    parsed
}
