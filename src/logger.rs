/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fscd. If not, see <https://www.gnu.org/licenses/>.
 */

//! Logging setup and the JSON-lines event journal
//!
//! Diagnostics go through `tracing`; the subscriber writes to the systemd
//! journal when one is available and to stdout otherwise. Fan-mode and
//! fail-record events are additionally appended as one JSON object per
//! line to the event journal once it has been opened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

pub const DEFAULT_EVENT_LOG_PATH: &str = "/var/log/fscd/events.json";
pub const LOG_ENV_VAR: &str = "FSCD_LOG";
pub const DEFAULT_LOG_LEVEL: &str = "warn";
const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

lazy_static! {
    static ref EVENT_LOG: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Install the global tracing subscriber
///
/// Returns true when logging goes to the systemd journal.
pub fn init_tracing(log_level: &str) -> bool {
    let use_journald = Path::new(JOURNALD_SOCKET).exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

/// Open (append) the event journal at `path`
pub fn init_event_log(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if let Ok(mut guard) = EVENT_LOG.lock() {
        *guard = Some(file);
    }
    Ok(())
}

/// Close the event journal; later events are dropped
pub fn close_event_log() {
    if let Ok(mut guard) = EVENT_LOG.lock() {
        *guard = None;
    }
}

/// Append one event (no-op if the journal is not open)
pub fn log_event(event: &str, data: Value) {
    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();

    if let Ok(mut guard) = EVENT_LOG.lock() {
        if let Some(f) = guard.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_events_written_as_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs/events.json");
        init_event_log(&path).unwrap();

        log_event("fan_dead", json!({"fan": "0", "rpm": 120}));
        log_event("fan_recovered", json!({"fan": "0", "rpm": 5000}));
        close_event_log();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "fan_dead");
        assert_eq!(lines[1]["data"]["rpm"], 5000);
    }

    #[test]
    #[serial]
    fn test_events_dropped_when_closed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.json");
        init_event_log(&path).unwrap();
        close_event_log();
        log_event("zone_mode", json!({"zone": 0}));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
