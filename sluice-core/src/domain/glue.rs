//! Glue job registration

use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;

use crate::error::{Result, SynthError};
use crate::stack::{Construct, Reference, ResourceKind, StackEnv, arn_of};

pub const GLUE_ETL_COMMAND: &str = "glueetl";
pub const DEFAULT_GLUE_VERSION: &str = "4.0";
pub const DEFAULT_WORKER_COUNT: u32 = 2;
pub const MIN_WORKER_COUNT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerType {
    Standard,
    G025X,
    G1X,
    G2X,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Standard => "Standard",
            WorkerType::G025X => "G.025X",
            WorkerType::G1X => "G.1X",
            WorkerType::G2X => "G.2X",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub name: String,
    pub python_version: String,
    pub script_location: String,
}

/// Managed ETL job pointing at an uploaded script
#[derive(Debug, Clone)]
pub struct GlueJob {
    pub logical_id: String,
    pub name: String,
    /// Logical id of the role the job runs as
    pub role: String,
    pub command: JobCommand,
    pub glue_version: String,
    pub number_of_workers: u32,
    pub worker_type: WorkerType,
    pub default_arguments: BTreeMap<String, String>,
}

impl GlueJob {
    /// Python Spark job with two G.1X workers and metrics/continuous logging on
    pub fn python_etl(
        logical_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        script_location: impl Into<String>,
    ) -> Self {
        let default_arguments = [
            ("--job-language", "python"),
            ("--enable-metrics", "true"),
            ("--enable-continuous-cloudwatch-log", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            logical_id: logical_id.into(),
            name: name.into(),
            role: role.into(),
            command: JobCommand {
                name: GLUE_ETL_COMMAND.to_string(),
                python_version: "3".to_string(),
                script_location: script_location.into(),
            },
            glue_version: DEFAULT_GLUE_VERSION.to_string(),
            number_of_workers: DEFAULT_WORKER_COUNT,
            worker_type: WorkerType::G1X,
            default_arguments,
        }
    }

    pub fn with_workers(mut self, count: u32, worker_type: WorkerType) -> Self {
        self.number_of_workers = count;
        self.worker_type = worker_type;
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_arguments.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.number_of_workers < MIN_WORKER_COUNT {
            return Err(SynthError::InvalidWorkerCount {
                name: self.name.clone(),
                count: self.number_of_workers,
            });
        }
        Ok(())
    }
}

impl Construct for GlueJob {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::GlueJob
    }

    fn resource_type(&self) -> &'static str {
        "AWS::Glue::Job"
    }

    fn properties(&self, _env: &StackEnv) -> JsonValue {
        json!({
            "Name": self.name,
            "Role": arn_of(&self.role),
            "Command": {
                "Name": self.command.name,
                "PythonVersion": self.command.python_version,
                "ScriptLocation": self.command.script_location,
            },
            "GlueVersion": self.glue_version,
            "NumberOfWorkers": self.number_of_workers,
            "WorkerType": self.worker_type.as_str(),
            "DefaultArguments": self.default_arguments,
        })
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(self.role.clone(), ResourceKind::Role)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_etl_defaults() {
        let job = GlueJob::python_etl("GlueETLJob", "SampleETLJob", "GlueJobRole", "s3://b/k.py");
        assert!(job.validate().is_ok());

        let props = job.properties(&StackEnv::default());
        assert_eq!(props["Name"], "SampleETLJob");
        assert_eq!(props["Command"]["Name"], "glueetl");
        assert_eq!(props["Command"]["PythonVersion"], "3");
        assert_eq!(props["Command"]["ScriptLocation"], "s3://b/k.py");
        assert_eq!(props["GlueVersion"], "4.0");
        assert_eq!(props["NumberOfWorkers"], 2);
        assert_eq!(props["WorkerType"], "G.1X");
        assert_eq!(props["DefaultArguments"]["--job-language"], "python");
        assert_eq!(props["DefaultArguments"]["--enable-metrics"], "true");
        assert_eq!(props["DefaultArguments"]["--enable-continuous-cloudwatch-log"], "true");
        assert_eq!(props["Role"]["Fn::GetAtt"][0], "GlueJobRole");
    }

    #[test]
    fn test_too_few_workers() {
        let job = GlueJob::python_etl("J", "J", "R", "s3://b/k.py").with_workers(1, WorkerType::G1X);
        assert!(matches!(
            job.validate().unwrap_err(),
            SynthError::InvalidWorkerCount { count: 1, .. }
        ));
    }
}
