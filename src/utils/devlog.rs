//! Developer ("level 6") bench lines with a thread-local capture sink, so tests
//! can assert on the requests a cursor issued without touching the global logger.

use std::cell::RefCell;

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Guard that disables the thread-local sink on drop.
pub struct DevSinkGuard;
impl Drop for DevSinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Start capturing on this thread until the guard drops.
pub fn enable_thread_sink() -> DevSinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    DevSinkGuard
}

/// Push a message into the thread-local sink if enabled.
pub fn write_str(msg: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(msg.to_owned());
        }
    });
}

/// Take the captured lines of the current thread; empty when the sink is off.
pub fn drain() -> Vec<String> {
    TL_SINK.with(|s| s.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
}

pub fn snapshot() -> Vec<String> {
    TL_SINK.with(|s| s.borrow().as_ref().cloned().unwrap_or_default())
}

/// Captured JSON bench records whose `op` equals `op`. Non-JSON lines are skipped.
#[must_use]
pub fn captured_ops(op: &str) -> Vec<serde_json::Value> {
    snapshot()
        .iter()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|v| v.get("op").and_then(serde_json::Value::as_str) == Some(op))
        .collect()
}

/// Emit a dev6 line: captured by the thread-local sink if enabled, and logged at
/// TRACE under the dev6 target.
#[macro_export]
macro_rules! dev6 {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        $crate::utils::devlog::write_str(&__s);
        log::log!(target: $crate::utils::logger::DEV6_TARGET, log::Level::Trace, "{}", __s);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_captures_and_drains() {
        let _g = enable_thread_sink();
        crate::dev6!("{{\"bench\":\"query\",\"op\":\"{}\"}}", "find");
        crate::dev6!("plain");
        let snap = snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0], r#"{"bench":"query","op":"find"}"#);
        assert_eq!(captured_ops("find").len(), 1);
        assert!(captured_ops("count").is_empty());
        assert_eq!(drain().len(), 2);
        assert!(snapshot().is_empty());
    }

    #[test]
    fn sink_is_per_thread_and_off_after_guard() {
        {
            let _g = enable_thread_sink();
            let child = std::thread::spawn(|| {
                crate::dev6!("child");
                snapshot()
            });
            assert!(child.join().unwrap().is_empty());
        }
        crate::dev6!("after guard");
        assert!(drain().is_empty());
    }
}
