//! ---
//! vend_section: "03-logging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Context-enriched logging macros."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Macros that stamp a [`LogContext`](crate::LogContext) onto tracing events.

/// Emit an event at `$level` enriched with a [`LogContext`](crate::LogContext).
#[macro_export]
macro_rules! vend_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            machine_id = ctx.machine,
            manager = ctx.manager,
            state = ctx.state,
            topic = ctx.topic,
            message = %format_args!($($arg)+)
        );
    }};
    ($level:expr, $($arg:tt)+) => {{
        $crate::vend_event!($level, context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an informational log enriched with machine context.
#[macro_export]
macro_rules! vend_info {
    ($($arg:tt)+) => {
        $crate::vend_event!(tracing::Level::INFO, $($arg)+)
    };
}

/// Emit a debug log enriched with machine context.
#[macro_export]
macro_rules! vend_debug {
    ($($arg:tt)+) => {
        $crate::vend_event!(tracing::Level::DEBUG, $($arg)+)
    };
}

/// Emit a warning enriched with machine context.
#[macro_export]
macro_rules! vend_warn {
    ($($arg:tt)+) => {
        $crate::vend_event!(tracing::Level::WARN, $($arg)+)
    };
}

/// Emit an error log enriched with machine context.
#[macro_export]
macro_rules! vend_error {
    ($($arg:tt)+) => {
        $crate::vend_event!(tracing::Level::ERROR, $($arg)+)
    };
}
