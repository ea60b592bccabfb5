use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception_private::{ExcType, ExceptionRaise, RunError, SimpleException};

/// Error returned when a resource limit is exceeded during execution.
///
/// Recursion overflow surfaces as a catchable `RecursionError`; the other limits abort
/// execution with an uncatchable `MemoryError` or `TimeoutError`.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum instruction operations exceeded.
    Operation { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum recursion depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Operation { limit, count } => write!(f, "operation limit exceeded: {count} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Recursion { .. } => write!(f, "maximum recursion depth exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Maps the resource error to the exception it raises.
    ///
    /// - `Allocation`, `Memory` → `MemoryError`
    /// - `Operation`, `Time` → `TimeoutError`
    /// - `Recursion` → `RecursionError`
    #[must_use]
    pub(crate) fn into_exception(self) -> SimpleException {
        let exc_type = match self {
            Self::Allocation { .. } | Self::Memory { .. } => ExcType::MemoryError,
            Self::Operation { .. } | Self::Time { .. } => ExcType::TimeoutError,
            Self::Recursion { .. } => ExcType::RecursionError,
        };
        SimpleException::new(exc_type, Some(self.to_string()))
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        if matches!(err, ResourceError::Recursion { .. }) {
            Self::Exc(Box::new(ExceptionRaise::from(err.into_exception())))
        } else {
            Self::UncatchableExc(Box::new(ExceptionRaise::from(err.into_exception())))
        }
    }
}

/// Trait for tracking resource usage.
///
/// The heap consults the tracker on every allocation, the eval loop on every instruction
/// and on every frame entry.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when memory is freed.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called once per executed instruction to check operation and time limits.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before a frame is evaluated.
    ///
    /// `current_depth` is the number of frames already executing on this thread.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Number of instructions between voluntary hand-offs of the execution token.
    fn switch_interval(&self) -> u32 {
        DEFAULT_SWITCH_INTERVAL
    }

    /// Called before building a result whose size is known up front, such as a repeated
    /// string, so an oversized result fails before any memory is spent on it.
    fn check_large_result(&self, _estimated_bytes: usize) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Returns the total number of allocations tracked, if this tracker records them.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Returns the current approximate memory usage in bytes, if tracked.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// A tracker that enforces nothing but the default recursion limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_RECURSION_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of VM operations (instructions).
    pub max_operations: Option<usize>,
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum execution time.
    pub max_duration: Option<Duration>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Maximum recursion depth (frame depth).
    pub max_recursion_depth: Option<usize>,
    /// Instructions executed between voluntary releases of the execution token.
    pub switch_interval: Option<u32>,
}

/// Recommended maximum recursion depth if not otherwise specified.
///
/// Calls from bytecode to Python functions share one eval loop, but calls made from
/// native code (constructors, dunder methods, generator resumption) nest the loop on
/// the Rust stack, so the bound is lower in debug builds which use larger frames.
#[cfg(debug_assertions)]
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 100;

/// Recommended maximum recursion depth if not otherwise specified.
#[cfg(not(debug_assertions))]
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 400;

/// Default number of instructions between execution token hand-offs.
pub const DEFAULT_SWITCH_INTERVAL: u32 = 1000;

/// Maximum recursion depth for data structure operations (repr, eq).
///
/// Protects against stack overflow when traversing deeply nested or self-referencing
/// containers.
pub const MAX_DATA_RECURSION_DEPTH: u16 = 200;

impl ResourceLimits {
    /// Creates limits with everything disabled except the default recursion depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum number of VM operations (instructions).
    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    /// Sets the maximum execution duration.
    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the maximum recursion depth (frame depth).
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    /// Sets how many instructions run between execution token hand-offs.
    #[must_use]
    pub fn switch_interval(mut self, interval: u32) -> Self {
        self.switch_interval = Some(interval.max(1));
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// Tracks allocation count, memory usage, executed instructions and elapsed time,
/// returning errors when limits are exceeded.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    /// When execution started (for time limit checking).
    start_time: Instant,
    allocation_count: usize,
    operation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    /// Creates a new LimitedTracker with the given limits.
    ///
    /// The start time is recorded when the tracker is created, so create
    /// it immediately before starting execution.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
            operation_count: 0,
            current_memory: 0,
        }
    }

    /// Returns the elapsed time since tracker creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the number of instructions executed so far.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operation_count
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }

        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > max {
                return Err(ResourceError::Operation {
                    limit: max,
                    count: self.operation_count,
                });
            }
        }

        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_recursion_depth
            && current_depth >= max
        {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }

    fn switch_interval(&self) -> u32 {
        self.limits.switch_interval.unwrap_or(DEFAULT_SWITCH_INTERVAL)
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory {
            let used = self.current_memory.saturating_add(estimated_bytes);
            if used > max {
                return Err(ResourceError::Memory { limit: max, used });
            }
        }
        Ok(())
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}
