//! Sample ETL job
//!
//! Local counterpart of `etl/sample_job.py`, the script the Glue job runs:
//! resolves the job name, builds a small frame of sample records and
//! prints it. Any failure ends the process with a non-zero status.

mod frame;
mod options;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::frame::{Cell, Frame};
use crate::options::{optional_option, resolve_options};

/// Sample records loaded by the job
pub fn sample_frame() -> Result<Frame> {
    let mut frame = Frame::new(["name", "age"]);
    for (name, age) in [("Alice", 34_i64), ("Bob", 45)] {
        frame.push_row(vec![Cell::from(name), Cell::from(age)])?;
    }
    Ok(frame)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sample_etl_job=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let output = run(&args).context("ETL script failed")?;
    print!("{}", output);
    Ok(())
}

/// Runs the job and returns what it prints
pub fn run<S: AsRef<str>>(args: &[S]) -> Result<String> {
    let options = resolve_options(args, &["JOB_NAME"])?;
    info!("Starting job {}", options["JOB_NAME"]);

    let frame = sample_frame()?;
    let output = match optional_option(args, "OUTPUT_FORMAT").as_deref() {
        Some("json") => frame
            .to_json_lines()
            .into_iter()
            .map(|line| line + "\n")
            .collect::<String>(),
        _ => frame.show(),
    };

    info!("Job {} processed {} row(s)", options["JOB_NAME"], frame.len());
    Ok(output)
}
