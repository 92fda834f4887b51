//! Console reporting for upload events.

use std::collections::HashMap;
use std::sync::Mutex;

use skyload_transfer::{ChunkSpec, SpeedCalculator};
use skyload_uploader::{
    TaskId, UploadFailure, UploadFile, UploadListener, UploadResult, UploadTask,
};

/// Prints one line per lifecycle event, with speed and ETA on progress.
#[derive(Default)]
pub struct ConsoleReporter {
    speeds: Mutex<HashMap<TaskId, SpeedCalculator>>,
}

impl UploadListener for ConsoleReporter {
    fn on_rejected(&self, file: &UploadFile, reason: &str) {
        eprintln!("skipped {}: {reason}", file.name);
    }

    fn on_start(&self, task: &UploadTask) {
        println!("[{}] {} ({})", task.id, task.file_name, format_bytes(task.size));
    }

    fn on_chunk_success(&self, task: &UploadTask, chunk: &ChunkSpec) {
        let mut speeds = self.speeds.lock().unwrap();
        speeds.entry(task.id).or_default().add_sample(chunk.length);
    }

    fn on_progress(&self, task: &UploadTask, bytes_sent: u64, bytes_total: u64) {
        let speeds = self.speeds.lock().unwrap();
        let (speed, eta) = speeds
            .get(&task.id)
            .map(|s| (s.bytes_per_second(), s.eta(bytes_total.saturating_sub(bytes_sent))))
            .unwrap_or((0.0, None));
        let eta = eta.map(|d| format!(", eta {}s", d.as_secs())).unwrap_or_default();
        println!(
            "[{}] {:5.1}% {}/{} at {}/s{eta}",
            task.id,
            task.progress().percentage(),
            format_bytes(bytes_sent),
            format_bytes(bytes_total),
            format_bytes(speed as u64),
        );
    }

    fn on_retry(&self, task: &UploadTask, chunk: &ChunkSpec, attempt: u32) {
        eprintln!("[{}] chunk {} retry #{attempt}", task.id, chunk.index);
    }

    fn on_success(&self, task: &UploadTask, result: &UploadResult) {
        self.speeds.lock().unwrap().remove(&task.id);
        let status = result.response().map(|r| r.status).unwrap_or_default();
        println!("[{}] done: {} (status {status})", task.id, task.file_name);
    }

    fn on_failure(&self, task: &UploadTask, failure: &UploadFailure) {
        self.speeds.lock().unwrap().remove(&task.id);
        eprintln!("[{}] {failure}", task.id);
    }

    fn on_cancel(&self, task: &UploadTask) {
        self.speeds.lock().unwrap().remove(&task.id);
        eprintln!("[{}] cancelled: {}", task.id, task.file_name);
    }
}

/// Formats a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
