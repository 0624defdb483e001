use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_types::{PortRange, ServiceRecord, TimingProfile};

use crate::error::ProbeError;
use crate::parser::{parse_os, parse_services};
use crate::runner::run_tool;

/// OS label used whenever detection produced nothing.
pub const UNKNOWN_OS: &str = "Unknown";

/// Knobs for the discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortScanOptions {
    /// SYN scan instead of a full connect scan.
    pub stealth: bool,
    pub timing: TimingProfile,
}

/// Outcome of the version/OS pass. Failures are soft: an empty list with
/// `os = "Unknown"`, and `timed_out` set when the deadline was hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDetection {
    pub services: Vec<ServiceRecord>,
    pub os: String,
    pub timed_out: bool,
}

impl ServiceDetection {
    pub fn empty(timed_out: bool) -> Self {
        Self {
            services: Vec::new(),
            os: UNKNOWN_OS.to_string(),
            timed_out,
        }
    }
}

/// The process boundary the orchestrator drives.
#[async_trait]
pub trait ServiceScanner: Send + Sync {
    /// Discover open ports. Every failure, including the deadline, is a hard
    /// error for the calling phase.
    async fn port_scan(
        &self,
        target: &str,
        ports: &PortRange,
        options: PortScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceRecord>, ProbeError>;

    /// Identify versions and OS. Only cancellation is returned as an error;
    /// everything else degrades to [`ServiceDetection::empty`].
    async fn service_detection(
        &self,
        target: &str,
        open_ports: &[u16],
        cancel: &CancellationToken,
    ) -> Result<ServiceDetection, ProbeError>;
}

/// `[-sS|-sT] [-T4] -p <range> -Pn <target>`
pub fn port_scan_args(target: &str, ports: &PortRange, options: PortScanOptions) -> Vec<String> {
    let mut args = vec![if options.stealth { "-sS" } else { "-sT" }.to_string()];
    if options.timing == TimingProfile::Aggressive {
        args.push("-T4".into());
    }
    args.extend([
        "-p".to_string(),
        ports.to_string(),
        "-Pn".to_string(),
        target.to_string(),
    ]);
    args
}

/// `-sV [-O] -Pn [-p <open ports>] <target>`
pub fn service_detection_args(
    target: &str,
    open_ports: &[u16],
    os_detection: bool,
) -> Vec<String> {
    let mut args = vec!["-sV".to_string()];
    if os_detection {
        args.push("-O".into());
    }
    args.push("-Pn".into());
    if !open_ports.is_empty() {
        let list = open_ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        args.push("-p".into());
        args.push(list);
    }
    args.push(target.to_string());
    args
}

/// Drives the `nmap` binary (or anything with the same CLI and output).
#[derive(Debug, Clone)]
pub struct NmapScanner {
    binary: String,
    port_scan_timeout: Duration,
    service_timeout: Duration,
}

impl Default for NmapScanner {
    fn default() -> Self {
        Self::new("nmap", Duration::from_secs(30), Duration::from_secs(60))
    }
}

impl NmapScanner {
    pub fn new(
        binary: impl Into<String>,
        port_scan_timeout: Duration,
        service_timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            port_scan_timeout,
            service_timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

#[async_trait]
impl ServiceScanner for NmapScanner {
    async fn port_scan(
        &self,
        target: &str,
        ports: &PortRange,
        options: PortScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceRecord>, ProbeError> {
        let args = port_scan_args(target, ports, options);
        let output = run_tool(
            &self.binary,
            &args,
            self.port_scan_timeout,
            "port scan",
            cancel,
        )
        .await?;

        let records = parse_services(target, &output.stdout);
        if !output.success {
            if records.is_empty() {
                return Err(ProbeError::ToolFailed {
                    code: output.code,
                    stderr: output.stderr,
                });
            }
            warn!(
                target,
                code = ?output.code,
                stderr = %output.stderr,
                "scanner exited non-zero, keeping parsed ports"
            );
        }
        info!(target, open = records.len(), "port scan complete");
        Ok(records)
    }

    async fn service_detection(
        &self,
        target: &str,
        open_ports: &[u16],
        cancel: &CancellationToken,
    ) -> Result<ServiceDetection, ProbeError> {
        if let Some(detection) = self.detect(target, open_ports, true, cancel).await? {
            return Ok(detection);
        }
        // OS fingerprinting needs raw sockets; an unprivileged run refuses the
        // whole invocation, so version detection is retried on its own.
        info!(target, "retrying service detection without OS fingerprinting");
        Ok(self
            .detect(target, open_ports, false, cancel)
            .await?
            .unwrap_or_else(|| ServiceDetection::empty(false)))
    }
}

impl NmapScanner {
    /// One detection run. `None` means the tool exited non-zero without a
    /// single parsable port line.
    async fn detect(
        &self,
        target: &str,
        open_ports: &[u16],
        os_detection: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<ServiceDetection>, ProbeError> {
        let args = service_detection_args(target, open_ports, os_detection);
        let output = match run_tool(
            &self.binary,
            &args,
            self.service_timeout,
            "service detection",
            cancel,
        )
        .await
        {
            Ok(output) => output,
            Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
            Err(ProbeError::Timeout { after, .. }) => {
                warn!(target, secs = after.as_secs(), "service detection timed out");
                return Ok(Some(ServiceDetection::empty(true)));
            }
            Err(e) => {
                warn!(target, error = %e, "service detection unavailable");
                return Ok(Some(ServiceDetection::empty(false)));
            }
        };

        let services = parse_services(target, &output.stdout);
        if !output.success && services.is_empty() {
            warn!(
                target,
                os_detection,
                code = ?output.code,
                stderr = %output.stderr,
                "service detection failed"
            );
            return Ok(None);
        }
        let os = parse_os(&output.stdout).unwrap_or_else(|| UNKNOWN_OS.to_string());
        debug!(target, services = services.len(), %os, "service detection complete");
        Ok(Some(ServiceDetection {
            services,
            os,
            timed_out: false,
        }))
    }
}
