//! Supporting utility type.
mod bytestr;
pub use bytestr::ByteStr;

/// Trace when the connection verbosity flag is set.
macro_rules! verbose {
    ($on:expr, $($tt:tt)*) => {
        if $on {
            tracing::trace!($($tt)*)
        }
    };
}

/// Create a `Span` when the connection verbosity flag is set, otherwise a disabled one.
///
/// The span is meant to be attached with [`Instrument`][tracing::Instrument], entering it
/// across an `.await` would make the future `!Send`.
macro_rules! span {
    ($on:expr, $($tt:tt)*) => {
        match $on {
            true => tracing::trace_span!($($tt)*),
            false => tracing::Span::none(),
        }
    };
}

pub(crate) use verbose;
pub(crate) use span;
