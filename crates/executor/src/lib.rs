//! Command executor pipeline for taskpilot.
//!
//! A finalized tool invocation flows through:
//!
//! 1. **Registry lookup** by command type (unknown types yield no result)
//! 2. **Parameter validation** against the executor's required params
//! 3. **Middleware chain** (logging, caching, retry, performance, ...)
//! 4. **Executor** as the terminal step
//! 5. **Safe wrapper** turning any error or panic into a tool result

pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod safe;

pub use middleware::{
    CachingMiddleware, LoggingMiddleware, Middleware, Next, PerformanceMiddleware,
    PerformanceSample, RetryMiddleware,
};
pub use pipeline::CommandPipeline;
pub use registry::ExecutorRegistry;
pub use safe::{ErrorHandler, SafeExecutor};
