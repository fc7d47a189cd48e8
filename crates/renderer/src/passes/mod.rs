use std::collections::HashSet;

use anyhow::Result;
use effectstack::StackPass;

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{ShaderProgram, SlotProvider};
use crate::state::PipelineState;

pub mod ascii;
pub mod basic;
pub mod blur;
pub mod dither;
pub mod palette;
pub mod registry;
pub mod sort;
pub mod xdog;

/// Per-frame GPU handles lent to passes by the orchestrator.
pub struct PassContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
}

/// One stage of the pipeline. A pass reads its predecessor's state, draws
/// into pooled targets, and returns the state the next stage consumes; it
/// never mutates its input texture.
pub trait Pass: StackPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState>;

    /// True when the pass stalls the frame on a GPU readback.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// Common shape of a single-draw pass: acquire an output target at the
/// input's size, run the program once, hand the target forward.
pub(crate) fn run_single(
    ctx: &PassContext,
    program: &mut ShaderProgram,
    input: &PipelineState,
    pool: &mut RenderTargetPool,
    slots: &dyn SlotProvider,
) -> Result<PipelineState> {
    let out = pool.acquire_temporary(input.width, input.height, &HashSet::new())?;
    program.draw(
        ctx.device,
        ctx.queue,
        &[&input.view],
        &out.view,
        slots,
        (input.width, input.height),
        (out.width, out.height),
    );
    Ok(PipelineState::from_target(&out))
}
