use chrono::Local;
use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::Path,
    thread,
};

use crate::logging::LOG_FILE_PREFIX;

/// Install a panic hook that reports through `tracing`.
///
/// Release builds abort on panic, so the record is also appended straight to
/// today's log file before the non-blocking writer gets a chance to drop it.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(panic_info);
            tracing::error!(target: "ddcheck::panic", "{record}");

            if cfg!(panic = "abort") {
                let _ = append_to_log(&log_dir, &record);
            }
        }));

        previous_hook(panic_info);
    }));
}

fn append_to_log(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let path = log_dir.join(format!("{LOG_FILE_PREFIX}.{}", Local::now().format("%Y-%m-%d")));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = payload_text(panic_info.payload()).unwrap_or_else(|| panic_info.to_string());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current().name().unwrap_or("<unnamed>").to_string();

    format!(
        "{} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        Backtrace::force_capture()
    )
}

/// Extract the message of a panic payload, if it is a string.
///
/// Shared with the supervisors, which see payloads through `JoinError`.
pub fn payload_text(payload: &(dyn std::any::Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some((*s).to_string());
    }
    payload.downcast_ref::<String>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_text() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(payload_text(boxed.as_ref()).as_deref(), Some("boom"));

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(payload_text(boxed.as_ref()).as_deref(), Some("bang"));

        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert!(payload_text(boxed.as_ref()).is_none());
    }
}
