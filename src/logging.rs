//! Internal logging helpers for structured terrace events.

/// Single logging target for terrace.
pub(crate) const LOG_TARGET: &str = "terrace";

macro_rules! terrace_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!($level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use terrace_log;
