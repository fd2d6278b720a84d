//! Device frame pools.

use crate::device::HwDeviceType;
use crate::driver::FramesConstraints;
use crate::error::{HwAccelError, Result};
use mediastage_core::error::{ConfigError, Error as CoreError, Result as CoreResult};
use mediastage_core::frame::{HwSurface, HwSurfacePool, Plane, VideoParams};
use mediastage_core::{Frame, PixelFormat};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Parameters of a device frame pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HwFramesParams {
    pub width: u32,
    pub height: u32,
    /// Format of the data held by each surface.
    pub sw_format: PixelFormat,
    /// Opaque format of the surfaces themselves.
    pub hw_format: PixelFormat,
    /// Number of surfaces.
    pub pool_size: usize,
}

impl HwFramesParams {
    /// Create pool parameters.
    pub fn new(
        width: u32,
        height: u32,
        sw_format: PixelFormat,
        hw_format: PixelFormat,
        pool_size: usize,
    ) -> Self {
        Self {
            width,
            height,
            sw_format,
            hw_format,
            pool_size,
        }
    }

    /// Validate against a device.
    pub fn validate(
        &self,
        device_type: HwDeviceType,
        constraints: &FramesConstraints,
    ) -> std::result::Result<(), ConfigError> {
        constraints.check_geometry(self.width, self.height)?;
        constraints.check_sw_format(self.sw_format)?;
        match device_type.hw_pixel_format() {
            Some(expected) if expected == self.hw_format => {}
            Some(expected) => {
                return Err(ConfigError::mismatch(
                    "hardware pixel format",
                    expected,
                    self.hw_format,
                ))
            }
            None => return Err(ConfigError::Missing("hardware device type".into())),
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("frame pool size must be positive".into()));
        }
        Ok(())
    }
}

/// A pool of device surfaces.
///
/// Surface memory is held by the pool and handed out through
/// [`HwSurface`] leases; a surface returns to the pool when the last frame
/// referencing it is dropped. Retiring a pool stops new allocations while
/// outstanding surfaces stay readable.
pub struct HwFramesContext {
    id: u64,
    device_id: u64,
    device_type: HwDeviceType,
    params: HwFramesParams,
    slots: Mutex<Vec<Option<Vec<Plane>>>>,
    retired: AtomicBool,
    this: Weak<HwFramesContext>,
}

impl HwFramesContext {
    pub(crate) fn new(device_id: u64, device_type: HwDeviceType, params: HwFramesParams) -> Arc<Self> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            pool = id,
            device = device_id,
            width = params.width,
            height = params.height,
            sw_format = %params.sw_format,
            pool_size = params.pool_size,
            "frames context created"
        );
        Arc::new_cyclic(|this| Self {
            id,
            device_id,
            device_type,
            params,
            slots: Mutex::new(vec![None; params.pool_size]),
            retired: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Pool id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the owning hardware context.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Device type of the owning context.
    pub fn device_type(&self) -> HwDeviceType {
        self.device_type
    }

    /// Pool parameters.
    pub fn params(&self) -> &HwFramesParams {
        &self.params
    }

    /// Surfaces currently leased out.
    pub fn surfaces_in_use(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Check whether the pool still hands out surfaces.
    pub fn is_active(&self) -> bool {
        !self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        if !self.retired.swap(true, Ordering::AcqRel) {
            debug!(pool = self.id, in_use = self.surfaces_in_use(), "frames context retired");
        }
    }

    /// Store planes in a free surface.
    pub fn write_surface(&self, planes: Vec<Plane>) -> Result<HwSurface> {
        if !self.is_active() {
            return Err(HwAccelError::PoolRetired(self.id));
        }
        let index = {
            let mut slots = self.slots.lock();
            let index = slots
                .iter()
                .position(Option::is_none)
                .ok_or(HwAccelError::PoolExhausted {
                    pool_size: self.params.pool_size,
                })?;
            slots[index] = Some(planes);
            index
        };
        let pool: Arc<dyn HwSurfacePool> = self
            .this
            .upgrade()
            .ok_or(HwAccelError::PoolRetired(self.id))?;
        trace!(pool = self.id, index, "surface allocated");
        Ok(HwSurface::new(pool, index))
    }

    /// Check that a software frame matches the pool geometry and format.
    pub fn check_software_frame(&self, frame: &Frame) -> Result<()> {
        let video = frame.video_params().ok_or_else(|| {
            ConfigError::mismatch("media type", "video", frame.media_type())
        })?;
        if frame.is_hw_frame() {
            return Err(ConfigError::Residency {
                location: format!("upload to pool {}", self.id),
                expected: "software".into(),
                actual: "hardware".into(),
            }
            .into());
        }
        if video.format != self.params.sw_format {
            return Err(ConfigError::mismatch("pixel format", self.params.sw_format, video.format).into());
        }
        if (video.width, video.height) != (self.params.width, self.params.height) {
            return Err(ConfigError::mismatch(
                "frame size",
                format!("{}x{}", self.params.width, self.params.height),
                format!("{}x{}", video.width, video.height),
            )
            .into());
        }
        Ok(())
    }

    /// Copy a software frame into a new surface and wrap it as a hardware frame.
    pub fn upload(&self, frame: &Frame) -> Result<Frame> {
        self.check_software_frame(frame)?;
        let planes = frame
            .planes()
            .ok_or_else(|| HwAccelError::Transfer("frame has no payload".into()))?
            .to_vec();
        let sar = frame
            .video_params()
            .map(|v| v.sample_aspect_ratio)
            .unwrap_or_default();
        let surface = self.write_surface(planes)?;
        self.wrap(surface, sar, frame)
    }

    /// Wrap a surface of this pool as a frame, copying timing from `props`.
    pub fn wrap(
        &self,
        surface: HwSurface,
        sample_aspect_ratio: mediastage_core::Rational,
        props: &Frame,
    ) -> Result<Frame> {
        let mut params = VideoParams::new(self.params.width, self.params.height, self.params.hw_format);
        params.sample_aspect_ratio = sample_aspect_ratio;
        let mut out = Frame::from_hw_surface(params, surface)
            .map_err(|e| HwAccelError::Transfer(e.to_string()))?;
        out.copy_props(props);
        Ok(out)
    }
}

impl HwSurfacePool for HwFramesContext {
    fn pool_id(&self) -> u64 {
        self.id
    }

    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn hw_format(&self) -> PixelFormat {
        self.params.hw_format
    }

    fn sw_format(&self) -> PixelFormat {
        self.params.sw_format
    }

    fn is_retired(&self) -> bool {
        !self.is_active()
    }

    fn read_surface(&self, index: usize) -> CoreResult<Vec<Plane>> {
        self.slots
            .lock()
            .get(index)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| CoreError::Hardware(format!("surface {index} of pool {} is free", self.id)))
    }

    fn release_surface(&self, index: usize) {
        if let Some(slot) = self.slots.lock().get_mut(index) {
            *slot = None;
        }
        trace!(pool = self.id, index, "surface released");
    }
}

impl fmt::Debug for HwFramesContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwFramesContext")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("params", &self.params)
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> Arc<HwFramesContext> {
        HwFramesContext::new(
            1,
            HwDeviceType::Cuda,
            HwFramesParams::new(64, 32, PixelFormat::Nv12, PixelFormat::Cuda, size),
        )
    }

    #[test]
    fn test_validate() {
        let c = FramesConstraints::default();
        let ok = HwFramesParams::new(64, 32, PixelFormat::Nv12, PixelFormat::Cuda, 4);
        assert!(ok.validate(HwDeviceType::Cuda, &c).is_ok());
        assert!(ok.validate(HwDeviceType::Vaapi, &c).is_err());
        let tiny = HwFramesParams { width: 4, ..ok };
        assert!(matches!(
            tiny.validate(HwDeviceType::Cuda, &c),
            Err(ConfigError::OutOfRange { .. })
        ));
        let empty = HwFramesParams { pool_size: 0, ..ok };
        assert!(empty.validate(HwDeviceType::Cuda, &c).is_err());
    }

    #[test]
    fn test_upload_and_release() {
        let pool = pool(2);
        let mut sw = Frame::video(64, 32, PixelFormat::Nv12).unwrap();
        sw.plane_mut(0).unwrap().row_mut(3)[5] = 42;
        let hw = pool.upload(&sw).unwrap();
        assert!(hw.is_hw_frame());
        assert_eq!(hw.pixel_format(), Some(PixelFormat::Cuda));
        assert_eq!(pool.surfaces_in_use(), 1);

        let planes = hw.hw_surface().unwrap().read().unwrap();
        assert_eq!(planes[0].row(3)[5], 42);

        drop(hw);
        assert_eq!(pool.surfaces_in_use(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let pool = pool(1);
        let sw = Frame::video(64, 32, PixelFormat::Nv12).unwrap();
        let _held = pool.upload(&sw).unwrap();
        assert!(matches!(
            pool.upload(&sw),
            Err(HwAccelError::PoolExhausted { pool_size: 1 })
        ));
    }

    #[test]
    fn test_upload_rejects_mismatched_frame() {
        let pool = pool(1);
        let wrong_format = Frame::video(64, 32, PixelFormat::Yuv420p).unwrap();
        assert!(matches!(pool.upload(&wrong_format), Err(HwAccelError::Config(_))));
        let wrong_size = Frame::video(32, 32, PixelFormat::Nv12).unwrap();
        assert!(matches!(pool.upload(&wrong_size), Err(HwAccelError::Config(_))));
    }

    #[test]
    fn test_retired_pool_keeps_surfaces_readable() {
        let pool = pool(2);
        let sw = Frame::video(64, 32, PixelFormat::Nv12).unwrap();
        let hw = pool.upload(&sw).unwrap();
        pool.retire();
        assert!(hw.hw_surface().unwrap().pool().is_retired());
        assert!(hw.hw_surface().unwrap().read().is_ok());
        assert!(matches!(pool.upload(&sw), Err(HwAccelError::PoolRetired(_))));
    }
}
