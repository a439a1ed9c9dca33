//! Transformer that shells out to an external tool.
//!
//! The tool is expected to write the product to `{output}` and print a JSON
//! quality report as the last line of stdout. Exit code 65 (`EX_DATAERR`)
//! marks the input as unprocessable.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{TransformError, TransformJob, TransformOutput, Transformer};
use crate::config::TransformCommandConfig;
use crate::manifest::{QualityMetrics, ResourceUsage};

const EXIT_CORRUPT_INPUT: i32 = 65;
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Default, Deserialize)]
struct QualityReport {
    #[serde(default)]
    quality_score: Option<f64>,
    #[serde(default)]
    missing_data_pct: Option<f64>,
    #[serde(default)]
    saturation_pct: Option<f64>,
    #[serde(default)]
    mean_solar_zenith: Option<f64>,
    #[serde(default)]
    memory_mb: Option<f64>,
    #[serde(default)]
    cpu_percent: Option<f64>,
}

pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransformer {
    pub fn new(config: &TransformCommandConfig, timeout: Duration) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout,
        }
    }

    fn build_args(&self, job: &TransformJob) -> Vec<String> {
        let timestamp = job.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &job.raw_path.to_string_lossy())
                    .replace("{output}", &job.output_path.to_string_lossy())
                    .replace("{file_id}", &job.file_id)
                    .replace("{timestamp}", &timestamp)
            })
            .collect()
    }
}

fn parse_report(stdout: &str) -> Result<QualityReport, TransformError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| TransformError::ParseError {
            reason: "tool printed no quality report".to_string(),
        })?;

    serde_json::from_str(line).map_err(|e| TransformError::ParseError {
        reason: format!("{}: {}", e, line),
    })
}

fn stderr_tail(stderr: &[u8]) -> Option<String> {
    if stderr.is_empty() {
        return None;
    }
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    Some(String::from_utf8_lossy(&stderr[start..]).into_owned())
}

#[async_trait]
impl Transformer for CommandTransformer {
    fn name(&self) -> &str {
        "command"
    }

    async fn transform(&self, job: &TransformJob) -> Result<TransformOutput, TransformError> {
        if !tokio::fs::try_exists(&job.raw_path).await? {
            return Err(TransformError::CorruptInput {
                reason: format!("raw artifact missing: {}", job.raw_path.display()),
            });
        }
        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.build_args(job);
        debug!("Running transform: {} {:?}", self.program, args);

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransformError::ToolNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    TransformError::Io(e)
                }
            })?;

        // Dropping the timed-out future drops the child, which kills it.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransformError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            return Err(match output.status.code() {
                Some(EXIT_CORRUPT_INPUT) => TransformError::CorruptInput {
                    reason: stderr.unwrap_or_else(|| "tool rejected input".to_string()),
                },
                code => TransformError::failed(format!("tool exited with code {:?}", code), stderr),
            });
        }

        let report = parse_report(&String::from_utf8_lossy(&output.stdout))?;

        if !tokio::fs::try_exists(&job.output_path).await? {
            return Err(TransformError::failed(
                format!("tool produced no output at {}", job.output_path.display()),
                stderr_tail(&output.stderr),
            ));
        }

        Ok(TransformOutput {
            output_path: job.output_path.clone(),
            quality: QualityMetrics {
                quality_score: report.quality_score,
                missing_data_pct: report.missing_data_pct,
                saturation_pct: report.saturation_pct,
                mean_solar_zenith: report.mean_solar_zenith,
            },
            resources: ResourceUsage {
                memory_mb: report.memory_mb,
                cpu_percent: report.cpu_percent,
            },
        })
    }
}
