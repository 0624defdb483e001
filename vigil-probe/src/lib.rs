mod error;
pub mod parser;
mod runner;
mod scanner;

pub use error::ProbeError;
pub use parser::{parse_os, parse_services};
pub use runner::{ToolOutput, run_tool};
pub use scanner::{
    NmapScanner, PortScanOptions, ServiceDetection, ServiceScanner, UNKNOWN_OS, port_scan_args,
    service_detection_args,
};
