//! VRAM probe backed by `nvidia-smi`.

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use brainops_core::{defaults, Error, Result, VramProbe};

/// Arguments asking for free memory of GPU 0 as a bare MiB value.
const QUERY_FREE_MEMORY: [&str; 3] = [
    "--query-gpu=memory.free",
    "--format=csv,noheader,nounits",
    "--id=0",
];

/// Queries free VRAM of the first GPU.
///
/// Every failure (missing binary, non-zero exit, empty or unparsable output)
/// is an [`Error::GpuProbe`]: the guard must never mistake a broken probe for
/// a busy GPU.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: String,
    args: Vec<String>,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self {
            program: defaults::NVIDIA_SMI.to_string(),
            args: QUERY_FREE_MEMORY.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Use another program and arguments (wrapper scripts, remote hosts).
    pub fn with_command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl VramProbe for NvidiaSmiProbe {
    async fn free_vram_mb(&self) -> Result<u64> {
        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                error!(
                    subsystem = "inference",
                    component = "nvidia_smi",
                    program = %self.program,
                    error = %e,
                    "VRAM probe could not be started"
                );
                Error::GpuProbe(format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::GpuProbe(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let free = parse_free_vram_mb(&stdout)?;
        debug!(
            subsystem = "inference",
            component = "nvidia_smi",
            op = "free_vram_mb",
            free_vram_mb = free,
            duration_ms = start.elapsed().as_millis() as u64,
            "VRAM probed"
        );
        Ok(free)
    }
}

/// Parse the first line of `memory.free` CSV output (MiB, no header, no units).
pub fn parse_free_vram_mb(stdout: &str) -> Result<u64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| Error::GpuProbe("empty nvidia-smi output".to_string()))?;

    let value = line.split(',').next().unwrap_or(line).trim();
    value
        .parse::<u64>()
        .map_err(|_| Error::GpuProbe(format!("unexpected nvidia-smi output: {:?}", line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_gpu() {
        assert_eq!(parse_free_vram_mb("10240\n").unwrap(), 10240);
    }

    #[test]
    fn test_parse_takes_first_line() {
        assert_eq!(parse_free_vram_mb("  7000 \n24000\n").unwrap(), 7000);
        assert_eq!(parse_free_vram_mb("\n\n512").unwrap(), 512);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_free_vram_mb(""), Err(Error::GpuProbe(_))));
        assert!(matches!(
            parse_free_vram_mb("No devices were found"),
            Err(Error::GpuProbe(_))
        ));
        assert!(matches!(
            parse_free_vram_mb("[N/A]"),
            Err(Error::GpuProbe(_))
        ));
    }

    #[test]
    fn test_default_command() {
        let probe = NvidiaSmiProbe::new();
        assert_eq!(probe.program, "nvidia-smi");
        assert!(probe.args.iter().any(|a| a == "--query-gpu=memory.free"));
    }

    #[tokio::test]
    async fn test_probe_reads_command_output() {
        let probe = NvidiaSmiProbe::new().with_command("echo", ["9000"]);
        assert_eq!(probe.free_vram_mb().await.unwrap(), 9000);
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_fatal() {
        let probe =
            NvidiaSmiProbe::new().with_command("/nonexistent/brainops-nvidia-smi", Vec::<String>::new());
        let err = probe.free_vram_mb().await.unwrap_err();
        assert!(matches!(err, Error::GpuProbe(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_probe_non_zero_exit_is_fatal() {
        let probe = NvidiaSmiProbe::new().with_command("false", Vec::<String>::new());
        assert!(matches!(
            probe.free_vram_mb().await,
            Err(Error::GpuProbe(_))
        ));
    }
}
