//! Host/device frame transfers.

use crate::context::HardwareContext;
use crate::error::{HwAccelError, Result};
use mediastage_core::frame::{MediaParams, VideoParams};
use mediastage_core::Frame;
use tracing::trace;

/// Copy a software frame into the context's frame pool.
pub fn upload(ctx: &HardwareContext, frame: &Frame) -> Result<Frame> {
    let pool = ctx.frames_context().ok_or_else(|| {
        HwAccelError::Transfer(format!("context {} has no frames context", ctx.id()))
    })?;
    let out = pool.upload(frame)?;
    trace!(context = ctx.id(), pool = pool.id(), pts = ?frame.pts, "frame uploaded");
    Ok(out)
}

/// Copy a hardware frame back to host memory in the pool's software format.
pub fn download(frame: &Frame) -> Result<Frame> {
    let surface = frame.hw_surface().ok_or(HwAccelError::NotHardwareFrame)?;
    let planes = surface
        .read()
        .map_err(|e| HwAccelError::Transfer(e.to_string()))?;
    let hw = frame.video_params().ok_or(HwAccelError::NotHardwareFrame)?;
    let mut params = VideoParams::new(hw.width, hw.height, surface.pool().sw_format());
    params.sample_aspect_ratio = hw.sample_aspect_ratio;
    let mut out = Frame::from_planes(MediaParams::Video(params), planes)
        .map_err(|e| HwAccelError::Transfer(e.to_string()))?;
    out.copy_props(frame);
    trace!(device = surface.device_id(), pts = ?frame.pts, "frame downloaded");
    Ok(out)
}

/// Check that a hardware frame lives on `ctx`'s device.
pub fn ensure_same_device(ctx: &HardwareContext, frame: &Frame) -> Result<()> {
    let surface = frame.hw_surface().ok_or(HwAccelError::NotHardwareFrame)?;
    if surface.device_id() != ctx.id() {
        return Err(HwAccelError::DeviceMismatch {
            expected: ctx.id(),
            actual: surface.device_id(),
        });
    }
    Ok(())
}
