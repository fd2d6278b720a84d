//! Stage-side handle on a shared hardware context.

use crate::context::HardwareContext;
use crate::error::Result;
use mediastage_core::StageId;

/// Implemented by stages that may be bound to a hardware device.
pub trait HwAware {
    /// The device the stage is bound to, if any.
    fn hardware_context(&self) -> Option<&HardwareContext>;
}

/// A stage's registration on a [`HardwareContext`].
///
/// Detaches on drop. Detaching twice is harmless, so a stage can detach
/// eagerly on close and still rely on drop for error paths.
#[derive(Debug)]
pub struct HwAttachment {
    ctx: HardwareContext,
    stage: StageId,
    attached: bool,
}

impl HwAttachment {
    /// Register `stage` on `ctx`.
    pub fn attach(ctx: &HardwareContext, stage: StageId) -> Result<Self> {
        ctx.attach(stage)?;
        Ok(Self {
            ctx: ctx.clone(),
            stage,
            attached: true,
        })
    }

    /// The shared context.
    pub fn context(&self) -> &HardwareContext {
        &self.ctx
    }

    /// The registered stage.
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Check whether the registration is still held.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Drop the registration now.
    pub fn detach(&mut self) {
        if std::mem::take(&mut self.attached) {
            self.ctx.detach(self.stage);
        }
    }
}

impl Drop for HwAttachment {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HwDeviceType;
    use crate::driver::{LoopbackConfig, LoopbackDriver};

    #[test]
    fn test_drop_detaches() {
        let driver = LoopbackDriver::new(LoopbackConfig::default());
        let stats = driver.stats();
        let ctx = HardwareContext::create_with(&driver, HwDeviceType::Cuda).unwrap();
        let mut a = HwAttachment::attach(&ctx, StageId::new()).unwrap();
        let b = HwAttachment::attach(&ctx, StageId::new()).unwrap();
        assert_eq!(ctx.live_count(), 2);

        a.detach();
        a.detach();
        assert_eq!(ctx.live_count(), 1);
        drop(a);
        assert!(!ctx.is_disposed());

        drop(b);
        assert!(ctx.is_disposed());
        assert_eq!(stats.released(), 1);
    }
}
