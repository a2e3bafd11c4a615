//! Response capture subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → layer.rs (create trace, buffer ingress)
//!     → inner service
//!     → body.rs (CaptureBody streams frames through unchanged)
//!         → interceptor.rs (status, size, private copy of egress)
//!     → on finish: trace finalized → TraceWriter queue
//! ```
//!
//! # Design Decisions
//! - Bytes reach the client exactly as the inner service produced them
//! - Client disconnect and response deadline are terminal states of the
//!   interceptor, raced safely against normal completion
//! - Incomplete exchanges are discarded unless configured otherwise

pub mod body;
pub mod interceptor;
pub mod layer;

pub use body::CaptureBody;
pub use interceptor::{
    CaptureState, CapturedResponse, CloseSignal, InterceptError, Passthrough,
    ResponseInterceptor, ResponseSink,
};
pub use layer::{capture_middleware, CaptureContext};
