//! Build specifications
//!
//! A buildspec is a list of phases, each a list of shell commands. Phases are
//! keyed by [`PhaseName`], whose ordering is the execution order, so a spec
//! always serializes and runs `install` before `pre_build` before `build`
//! before `post_build`, regardless of insertion order.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub const BUILDSPEC_VERSION: &str = "0.2";

/// Build phase, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Install,
    PreBuild,
    Build,
    PostBuild,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Install => "install",
            PhaseName::PreBuild => "pre_build",
            PhaseName::Build => "build",
            PhaseName::PostBuild => "post_build",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Language runtimes to select before the phase runs, e.g. `python: "3.11"`
    #[serde(
        rename = "runtime-versions",
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "runtime_versions"
    )]
    pub runtime_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Phase {
    pub fn commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runtime_versions: BTreeMap::new(),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>, version: impl Into<String>) -> Self {
        self.runtime_versions.insert(runtime.into(), version.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(deserialize_with = "version_string")]
    pub version: String,
    pub phases: BTreeMap<PhaseName, Phase>,
}

impl BuildSpec {
    pub fn new() -> Self {
        Self {
            version: BUILDSPEC_VERSION.to_string(),
            phases: BTreeMap::new(),
        }
    }

    pub fn with_phase(mut self, name: PhaseName, phase: Phase) -> Self {
        self.phases.insert(name, phase);
        self
    }

    /// Phases in execution order
    pub fn ordered_phases(&self) -> impl Iterator<Item = (PhaseName, &Phase)> {
        self.phases.iter().map(|(name, phase)| (*name, phase))
    }

    pub fn command_count(&self) -> usize {
        self.phases.values().map(|p| p.commands.len()).sum()
    }

    /// Compact JSON, as embedded in a build project
    pub fn to_json(&self) -> String {
        // Only strings and string maps; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// Scalar that YAML may have typed as a number, e.g. `version: 0.2`
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

fn version_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Integer(number) => number.to_string(),
        Scalar::Float(number) => number.to_string(),
    })
}

/// Runtime versions as written
///
/// An unquoted fractional version has already lost its source text
/// (`3.10` parses as `3.1`), so it is rejected rather than guessed.
fn runtime_versions<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(runtime, version)| match version {
            Scalar::Text(text) => Ok((runtime, text)),
            Scalar::Integer(number) => Ok((runtime, number.to_string())),
            Scalar::Float(number) => Err(D::Error::custom(format!(
                "runtime version for '{}' must be quoted, e.g. \"{}\"",
                runtime, number
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_serialize_in_execution_order() {
        let spec = BuildSpec::new()
            .with_phase(PhaseName::Build, Phase::commands(["cdk deploy"]))
            .with_phase(
                PhaseName::Install,
                Phase::commands(["npm install -g aws-cdk"]).with_runtime("python", "3.11"),
            );

        let json = spec.to_json();
        let install = json.find("\"install\"").unwrap();
        let build = json.find("\"build\"").unwrap();
        assert!(install < build);
        assert!(json.contains("\"runtime-versions\":{\"python\":\"3.11\"}"));
        assert!(json.starts_with("{\"version\":\"0.2\""));
    }

    #[test]
    fn test_empty_runtime_versions_omitted() {
        let spec = BuildSpec::new().with_phase(PhaseName::Build, Phase::commands(["make"]));
        assert!(!spec.to_json().contains("runtime-versions"));
        assert_eq!(spec.command_count(), 1);
    }

    #[test]
    fn test_parse_snake_case_phases() {
        let spec: BuildSpec = serde_json::from_str(
            r#"{"version":"0.2","phases":{"post_build":{"commands":["b"]},"pre_build":{"commands":["a"]}}}"#,
        )
        .unwrap();

        let order: Vec<PhaseName> = spec.ordered_phases().map(|(name, _)| name).collect();
        assert_eq!(order, vec![PhaseName::PreBuild, PhaseName::PostBuild]);
        assert_eq!(PhaseName::PostBuild.as_str(), "post_build");
    }

    #[test]
    fn test_numeric_version_accepted() {
        let spec: BuildSpec =
            serde_json::from_str(r#"{"version":0.2,"phases":{"build":{"commands":["make"]}}}"#)
                .unwrap();
        assert_eq!(spec.version, "0.2");
    }

    #[test]
    fn test_runtime_versions_keep_source_text() {
        let spec: BuildSpec = serde_json::from_str(
            r#"{"version":"0.2","phases":{"install":{"runtime-versions":{"python":"3.10","nodejs":18}}}}"#,
        )
        .unwrap();
        let install = &spec.phases[&PhaseName::Install];
        assert_eq!(install.runtime_versions["python"], "3.10");
        assert_eq!(install.runtime_versions["nodejs"], "18");
        assert!(install.commands.is_empty());
    }

    #[test]
    fn test_unquoted_fractional_runtime_version_rejected() {
        let err = serde_json::from_str::<BuildSpec>(
            r#"{"version":"0.2","phases":{"install":{"runtime-versions":{"python":3.10}}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be quoted"));
    }
}
