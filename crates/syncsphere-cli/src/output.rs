//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::json;

use syncsphere_core::sync::{Direction, SyncEvent};
use syncsphere_core::Manifest;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a scanned manifest
    pub fn print_manifest(&self, manifest: &Manifest) {
        match self.format {
            OutputFormat::Human => {
                if manifest.is_empty() {
                    println!("No files found.");
                    return;
                }
                for entry in manifest.entries() {
                    if entry.is_directory {
                        println!("{:>10}  {:16}  {}/", "-", "", entry.path);
                    } else {
                        println!(
                            "{:>10}  {}  {}",
                            format_size(entry.size),
                            entry.modified_at.format("%Y-%m-%d %H:%M"),
                            entry.path
                        );
                    }
                }
                println!(
                    "\n{} file(s), {} total",
                    manifest.file_count(),
                    format_size(manifest.total_size())
                );
            }
            OutputFormat::Json => {
                println!("{}", json!({ "files": manifest }));
            }
            OutputFormat::Quiet => {
                for entry in manifest.entries() {
                    println!("{}", entry.path);
                }
            }
        }
    }

    /// Print one session event
    pub fn print_event(&self, event: &SyncEvent) {
        match self.format {
            OutputFormat::Human => {
                if let Some(line) = describe_event(event) {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => {
                println!("{}", event_json(event));
            }
            OutputFormat::Quiet => {
                if let SyncEvent::Error(message) = event {
                    eprintln!("error: {}", message);
                }
            }
        }
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a failure that does not stop the command
    pub fn failure(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("✗ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "error", "message": message})
                );
            }
            OutputFormat::Quiet => eprintln!("error: {}", message),
        }
    }

    /// Print send progress for one file
    pub fn print_send_progress(&self, name: &str, sent: u64, total: u64) {
        let percent = percent(sent, total);
        match self.format {
            OutputFormat::Human => println!("  {} {:>3}%", name, percent),
            OutputFormat::Json => {
                println!(
                    "{}",
                    json!({"event": "send_progress", "name": name, "sent": sent, "total": total, "percent": percent})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print informational message (not shown in quiet mode)
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One human-readable line per event; state churn is left to the log
fn describe_event(event: &SyncEvent) -> Option<String> {
    let line = match event {
        SyncEvent::StatusChanged(status) => format!("Connection: {:?}", status),
        SyncEvent::StateChanged(_) => return None,
        SyncEvent::PeerInfo(name) => format!("Paired with {}", name),
        SyncEvent::ManifestSent {
            entries,
            total_size,
        } => format!(
            "Sent manifest: {} entries, {}",
            entries,
            format_size(*total_size)
        ),
        SyncEvent::PlanReady(plan) => format!(
            "Plan: {} to upload, {} to download, {} conflict(s)",
            plan.upload.len(),
            plan.download.len(),
            plan.conflicts.len()
        ),
        SyncEvent::Progress {
            current,
            total,
            label,
        } => format!("[{}/{}] {}", current, total, label),
        SyncEvent::TransferComplete {
            path,
            direction,
            bytes,
        } => {
            let arrow = match direction {
                Direction::Upload => "↑",
                Direction::Download => "↓",
            };
            format!("{} {} ({})", arrow, path, format_size(*bytes))
        }
        SyncEvent::SyncComplete {
            uploaded,
            downloaded,
        } => format!(
            "✓ Sync complete: {} uploaded, {} downloaded",
            uploaded, downloaded
        ),
        SyncEvent::Error(message) => format!("Error: {}", message),
    };
    Some(line)
}

fn event_json(event: &SyncEvent) -> serde_json::Value {
    match event {
        SyncEvent::StatusChanged(status) => {
            json!({"event": "status", "status": format!("{:?}", status)})
        }
        SyncEvent::StateChanged(state) => {
            json!({"event": "state", "state": format!("{:?}", state)})
        }
        SyncEvent::PeerInfo(name) => json!({"event": "peer", "name": name}),
        SyncEvent::ManifestSent {
            entries,
            total_size,
        } => json!({"event": "manifest_sent", "entries": entries, "total_size": total_size}),
        SyncEvent::PlanReady(plan) => json!({"event": "plan", "plan": plan}),
        SyncEvent::Progress {
            current,
            total,
            label,
        } => json!({"event": "progress", "current": current, "total": total, "label": label}),
        SyncEvent::TransferComplete {
            path,
            direction,
            bytes,
        } => json!({
            "event": "transfer_complete",
            "path": path,
            "direction": match direction {
                Direction::Upload => "upload",
                Direction::Download => "download",
            },
            "bytes": bytes
        }),
        SyncEvent::SyncComplete {
            uploaded,
            downloaded,
        } => json!({"event": "sync_complete", "uploaded": uploaded, "downloaded": downloaded}),
        SyncEvent::Error(message) => json!({"event": "error", "message": message}),
    }
}

/// Whole percent of `total`; an empty file is complete
pub fn percent(sent: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        sent.saturating_mul(100) / total
    }
}

/// Format a byte count with a binary unit
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncsphere_core::sync::EngineState;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(200, 200), 100);
    }

    #[test]
    fn test_describe_event() {
        let line = describe_event(&SyncEvent::TransferComplete {
            path: "a/b.txt".to_string(),
            direction: Direction::Download,
            bytes: 2048,
        });
        assert_eq!(line.as_deref(), Some("↓ a/b.txt (2.0 KiB)"));

        assert!(describe_event(&SyncEvent::StateChanged(EngineState::Idle)).is_none());
    }

    #[test]
    fn test_event_json() {
        let value = event_json(&SyncEvent::SyncComplete {
            uploaded: 2,
            downloaded: 1,
        });
        assert_eq!(value["event"], "sync_complete");
        assert_eq!(value["uploaded"], 2);
        assert_eq!(value["downloaded"], 1);
    }
}
