//! Process-wide, swappable log sink.
//!
//! Mirrors the teacher's `println!`/`info!`/`error!` macros, which write through a shared
//! global pointer to a `TextFrameBuffer`. Here the sink is a trait object so the loader can
//! start with nothing bound (host tests), point it at a firmware console early in `boot`,
//! and stop logging (or redirect to a framebuffer-backed sink) once `video::set_mode` has run
//! — legacy text output is not guaranteed valid after that point (see spec §5).

use core::fmt::{self, Write};
use spin::Mutex;

/// A destination for formatted log output.
///
/// Implementors are expected to be cheap to write to and not to allocate; the loader holds
/// the sink's mutex for the duration of a single log call only.
pub trait LogSink: Send + Sync {
    fn write_str(&self, s: &str);
}

static SINK: Mutex<Option<&'static dyn LogSink>> = Mutex::new(None);

/// Bind the process-wide sink. Replacing it is how the loader detaches from a legacy console
/// after setting the video mode.
pub fn set_log_sink(sink: &'static dyn LogSink) {
    *SINK.lock() = Some(sink);
}

/// Detach the sink, silencing subsequent log calls. Used right before `set_mode` when no
/// framebuffer-backed sink is available to take over.
pub fn clear_log_sink() {
    *SINK.lock() = None;
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _log_args(prefix: &str, ctx: Option<&str>, args: fmt::Arguments<'_>) {
    let guard = SINK.lock();
    let Some(sink) = *guard else { return };
    let mut writer = SinkWriter(sink);
    let _ = writer.write_str(prefix);
    if let Some(ctx) = ctx {
        let _ = write!(writer, "{ctx}: ");
    }
    let _ = writer.write_fmt(args);
    let _ = writer.write_str("\n");
}

/// Informational message, with an optional leading context literal.
#[macro_export]
macro_rules! info {
    ($ctx: literal, $($arg: tt)*) => {
        $crate::log::_log_args("[info] ", Some($ctx), format_args!($($arg)*))
    };
    ($($arg: tt)*) => {
        $crate::log::_log_args("[info] ", None, format_args!($($arg)*))
    };
}

/// Non-fatal warning.
#[macro_export]
macro_rules! warn {
    ($ctx: literal, $($arg: tt)*) => {
        $crate::log::_log_args("[warn] ", Some($ctx), format_args!($($arg)*))
    };
    ($($arg: tt)*) => {
        $crate::log::_log_args("[warn] ", None, format_args!($($arg)*))
    };
}

/// Fatal or otherwise error-level message.
#[macro_export]
macro_rules! error {
    ($ctx: literal, $($arg: tt)*) => {
        $crate::log::_log_args("[error] ", Some($ctx), format_args!($($arg)*))
    };
    ($($arg: tt)*) => {
        $crate::log::_log_args("[error] ", None, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use spin::Mutex as StdMutex;

    struct RecordingSink(StdMutex<Vec<u8>>);
    impl LogSink for RecordingSink {
        fn write_str(&self, s: &str) {
            self.0.lock().extend_from_slice(s.as_bytes());
        }
    }

    #[test]
    fn log_with_no_sink_is_a_silent_no_op() {
        clear_log_sink();
        info!("nothing should panic here: {}", 1);
    }

    #[test]
    fn log_reaches_bound_sink() {
        // Leak so the sink can satisfy `'static`, same lifetime trick the loader uses at boot
        // for its real framebuffer sink.
        let sink: &'static RecordingSink =
            Box::leak(Box::new(RecordingSink(StdMutex::new(Vec::new()))));
        set_log_sink(sink);
        info!("boot", "starting up");
        let captured = sink.0.lock().clone();
        let text = core::str::from_utf8(&captured).unwrap();
        assert!(text.contains("starting up"));
        assert!(text.contains("boot"));
        clear_log_sink();
    }
}
