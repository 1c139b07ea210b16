//! Leveled logging macros.
//!
//! Each macro gates on the global level before constructing anything, so a
//! statement below the threshold costs a single atomic load. Trace and
//! debug lines carry the enclosing module path as a scope marker.

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
        if $crate::logging::Level::Trace >= $crate::logging::level() {
            use ::std::fmt::Write as _;
            let mut record = $crate::logging::Record::with_scope(
                $crate::logging::Level::Trace,
                file!(),
                line!(),
                module_path!(),
            );
            let _ = write!(record, $($arg)+);
        }
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        if $crate::logging::Level::Debug >= $crate::logging::level() {
            use ::std::fmt::Write as _;
            let mut record = $crate::logging::Record::with_scope(
                $crate::logging::Level::Debug,
                file!(),
                line!(),
                module_path!(),
            );
            let _ = write!(record, $($arg)+);
        }
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        if $crate::logging::Level::Info >= $crate::logging::level() {
            use ::std::fmt::Write as _;
            let mut record =
                $crate::logging::Record::new($crate::logging::Level::Info, file!(), line!());
            let _ = write!(record, $($arg)+);
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        if $crate::logging::Level::Warn >= $crate::logging::level() {
            use ::std::fmt::Write as _;
            let mut record =
                $crate::logging::Record::new($crate::logging::Level::Warn, file!(), line!());
            let _ = write!(record, $($arg)+);
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        if $crate::logging::Level::Error >= $crate::logging::level() {
            use ::std::fmt::Write as _;
            let mut record =
                $crate::logging::Record::new($crate::logging::Level::Error, file!(), line!());
            let _ = write!(record, $($arg)+);
        }
    };
}

/// Emits the line, flushes the sink, then aborts the process.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        {
            use ::std::fmt::Write as _;
            let mut record =
                $crate::logging::Record::new($crate::logging::Level::Fatal, file!(), line!());
            let _ = write!(record, $($arg)+);
        }
        unreachable!()
    }};
}
