/// Fatal conditions of a leak-profiling pass.
///
/// Everything else (contention, full probe stacks, depth limits, timeouts)
/// degrades the result and is only counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeakError {
    /// Backing memory for a search structure could not be reserved.
    OutOfMemory { what: &'static str, bytes: usize },
    InvalidSettings(&'static str),
}

impl std::fmt::Display for LeakError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeakError::OutOfMemory { what, bytes } => {
                write!(f, "unable to reserve {bytes} bytes for {what}")
            }
            LeakError::InvalidSettings(msg) => {
                write!(f, "invalid leak profiler settings: {msg}")
            }
        }
    }
}

impl std::error::Error for LeakError {}

impl LeakError {
    pub(crate) fn out_of_memory<T>(what: &'static str, count: usize) -> Self {
        LeakError::OutOfMemory {
            what,
            bytes: count.saturating_mul(size_of::<T>()),
        }
    }
}
