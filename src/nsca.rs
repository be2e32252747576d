//! NSCA wire encoding and the external transmitter.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use crate::report::Report;
use crate::state::State;
use crate::{BridgeError, Result};

const MAX_RECORD_LEN: usize = 4096;
// Matches the literal two-character `\n` escape used for embedded newlines
// elsewhere in the message, not an actual newline byte.
const SNIP: &[u8] = b"\\n...\\nSOME METRICS OMITTED";
const RECORD_SEPARATOR: u8 = 0x17;

/// A [`Report`] with the reporting host attached, ready for NSCA encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct NscaReport {
    pub host: String,
    pub service: String,
    pub state: State,
    pub message: String,
}

impl NscaReport {
    pub fn from_report(host: String, report: Report) -> Self {
        NscaReport {
            host,
            service: report.service,
            state: report.state,
            message: report.message,
        }
    }

    /// Encode as `host;service;state_number;message`, escaping newlines in
    /// `message` as the literal two-character sequence `\n`, and capping the
    /// record at [`MAX_RECORD_LEN`] bytes.
    fn encode(&self) -> Vec<u8> {
        let escaped_message = self.message.replace('\n', "\\n");
        let mut message = escaped_message.into_bytes();

        if message.len() >= MAX_RECORD_LEN {
            let limit = MAX_RECORD_LEN.saturating_sub(SNIP.len());
            let cut = find_last_escaped_newline(&message, limit).unwrap_or(limit);
            message.truncate(cut);
            message.extend_from_slice(SNIP);
        }

        let mut record = Vec::new();
        record.extend_from_slice(self.host.as_bytes());
        record.push(b';');
        record.extend_from_slice(self.service.as_bytes());
        record.push(b';');
        record.extend_from_slice(self.state.wire_code().to_string().as_bytes());
        record.push(b';');
        record.extend_from_slice(&message);
        record
    }
}

/// Search for the last occurrence of the two-byte escaped-newline sequence
/// `\n` (backslash, n) at or before byte index `limit`.
fn find_last_escaped_newline(haystack: &[u8], limit: usize) -> Option<usize> {
    let limit = limit.min(haystack.len());
    haystack[..limit]
        .windows(2)
        .rposition(|w| w == b"\\n")
        .map(|i| i + 2)
}

/// Encode a full batch of reports into the `0x17`-joined NSCA payload.
pub fn encode_batch(reports: &[NscaReport]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, report) in reports.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.extend_from_slice(&report.encode());
    }
    out
}

/// External collaborator: delivers a batch of reports to the downstream
/// monitoring host. Implementations may fail the whole batch; per §7, a
/// failure is logged and the batch dropped — no retry, no queue retention.
#[async_trait]
pub trait NscaSink: Send + Sync {
    async fn send(&self, reports: &[NscaReport]) -> Result<()>;
}

/// Configuration for spawning the `send_nsca` executable.
#[derive(Debug, Clone)]
pub struct NscaConfig {
    pub host: String,
    pub port: u16,
    pub config_file: String,
    pub executable: String,
}

impl Default for NscaConfig {
    fn default() -> Self {
        NscaConfig {
            host: String::new(),
            port: 5667,
            config_file: "/etc/nsca/send_nsca.cfg".to_string(),
            executable: "/usr/sbin/send_nsca".to_string(),
        }
    }
}

/// Shells out to the `send_nsca` binary, matching the original Python
/// sink's subprocess invocation.
pub struct ProcessNscaSink {
    config: NscaConfig,
    dry_run: bool,
}

impl ProcessNscaSink {
    pub fn new(config: NscaConfig, dry_run: bool) -> Self {
        ProcessNscaSink { config, dry_run }
    }
}

#[async_trait]
impl NscaSink for ProcessNscaSink {
    async fn send(&self, reports: &[NscaReport]) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            for r in reports {
                debug!(host = %r.host, service = %r.service, state = %r.state, "dry-run: would send report");
            }
            return Ok(());
        }

        let payload = encode_batch(reports);

        let mut child = Command::new(&self.config.executable)
            .arg("-H")
            .arg(&self.config.host)
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("-c")
            .arg(&self.config.config_file)
            .arg("-d")
            .arg(";")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| BridgeError::TransmissionFailure(format!("spawn send_nsca: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| BridgeError::TransmissionFailure(format!("write to send_nsca: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BridgeError::TransmissionFailure(format!("wait for send_nsca: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            for line in stdout.lines() {
                debug!(line, "send_nsca output");
            }
        } else {
            for line in stdout.lines() {
                error!(line, "send_nsca output");
            }
            return Err(BridgeError::TransmissionFailure(format!(
                "send_nsca exited with status {}",
                output.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(message: &str) -> NscaReport {
        NscaReport {
            host: "monhost".to_string(),
            service: "svc".to_string(),
            state: State::Warning,
            message: message.to_string(),
        }
    }

    #[test]
    fn encodes_fields_in_order() {
        let encoded = report("all good").encode();
        assert_eq!(encoded, b"monhost;svc;1;all good");
    }

    #[test]
    fn escapes_embedded_newlines() {
        let encoded = report("line one\nline two").encode();
        assert_eq!(encoded, b"monhost;svc;1;line one\\nline two");
    }

    #[test]
    fn truncates_oversized_messages_at_newline_boundary() {
        let mut message = String::new();
        for i in 0..500 {
            message.push_str(&format!("metric_{i} is bad\n"));
        }
        let encoded = report(&message).encode();
        assert!(encoded.len() <= MAX_RECORD_LEN);
        assert!(encoded.ends_with(SNIP));
    }

    #[test]
    fn batch_is_joined_with_record_separator() {
        let reports = vec![report("a"), report("b")];
        let encoded = encode_batch(&reports);
        assert!(encoded.contains(&RECORD_SEPARATOR));
    }

    #[test]
    fn round_trip_capping_is_idempotent_on_conforming_messages() {
        let short = report("short message");
        let first = short.encode();
        assert!(first.len() <= MAX_RECORD_LEN);
        // Re-encoding an already-conforming message does not change it.
        let again = NscaReport {
            message: String::from_utf8(first.rsplitn(2, |&b| b == b';').next().unwrap().to_vec())
                .unwrap(),
            ..short
        };
        assert_eq!(again.encode(), first);
    }
}
