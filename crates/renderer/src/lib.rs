//! GPU-resident multi-pass effect pipeline.
//!
//! A frame moves through this crate in one direction: the orchestrator
//! uploads the current media frame as the input texture, threads it through
//! the ordered pass chain (each pass consuming its predecessor's output and
//! drawing into a pooled render target), blits the final state to the
//! display surface, and reclaims pooled targets that the frame did not
//! touch.

pub mod gpu;
pub mod passes;
pub mod pipeline;
pub mod state;

pub use gpu::context::GpuContext;
pub use gpu::pool::{PingPongPair, RenderTarget, RenderTargetPool, TargetId};
pub use gpu::program::{ParamDecl, ParamKind, ParamSource, ParamValue, ShaderProgram};
pub use passes::registry::PassRegistry;
pub use passes::{Pass, PassContext};
pub use pipeline::PipelineOrchestrator;
pub use state::{FramePixels, PipelineState};
