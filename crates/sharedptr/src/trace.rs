/// forwards to `log::trace!` when the `log` feature is enabled.
macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        {
            log::trace!(target: "sharedptr", $($arg)+);
        }
    };
}
