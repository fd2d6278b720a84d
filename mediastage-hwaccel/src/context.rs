//! Shared hardware device context.

use crate::device::HwDeviceType;
use crate::driver::{DeviceDriver, DeviceHandle, FramesConstraints, SystemDriver};
use crate::error::{HwAccelError, Result};
use crate::frames::{HwFramesContext, HwFramesParams};
use crate::probe::probe_order_for;
use mediastage_core::StageId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    id: u64,
    device_type: HwDeviceType,
    description: String,
    constraints: FramesConstraints,
    device: Mutex<Option<Box<dyn DeviceHandle>>>,
    frames: Mutex<Option<Arc<HwFramesContext>>>,
    extra_pools: Mutex<Vec<Weak<HwFramesContext>>>,
    attached: Mutex<HashSet<StageId>>,
    disposed: AtomicBool,
}

impl ContextInner {
    /// Release the device. Only the first caller does any work.
    fn dispose_once(&self, reason: &str) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(pool) = self.frames.lock().take() {
            pool.retire();
        }
        for pool in self.extra_pools.lock().drain(..) {
            if let Some(pool) = pool.upgrade() {
                pool.retire();
            }
        }
        if let Some(mut device) = self.device.lock().take() {
            device.release();
        }
        info!(context = self.id, device = %self.device_type, reason, "hardware context released");
        true
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.dispose_once("last handle dropped");
    }
}

/// A shared, reference-counted hardware device context.
///
/// Cloning is cheap and every clone refers to the same device. Stages
/// register with [`attach`](Self::attach) and unregister with
/// [`detach`](Self::detach); when the last registered stage detaches the
/// device is released. The device is released at most once no matter how
/// detach, [`dispose`](Self::dispose) and drop interleave.
#[derive(Clone)]
pub struct HardwareContext {
    inner: Arc<ContextInner>,
}

impl HardwareContext {
    /// Create a context on the host device of the given type.
    pub fn create(device_type: HwDeviceType) -> Result<Self> {
        Self::create_with(&SystemDriver, device_type)
    }

    /// Create a context through a specific driver.
    pub fn create_with(driver: &dyn DeviceDriver, device_type: HwDeviceType) -> Result<Self> {
        let device = driver.open(device_type, None)?;
        let inner = ContextInner {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            device_type,
            description: device.description(),
            constraints: device.constraints(),
            device: Mutex::new(Some(device)),
            frames: Mutex::new(None),
            extra_pools: Mutex::new(Vec::new()),
            attached: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
        };
        info!(
            context = inner.id,
            device = %device_type,
            driver = driver.name(),
            description = %inner.description,
            "hardware context created"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Probe the host in preferred order. `None` means run in software.
    pub fn auto() -> Option<Self> {
        Self::auto_with(&SystemDriver)
    }

    /// Probe through a specific driver. `None` means run in software.
    pub fn auto_with(driver: &dyn DeviceDriver) -> Option<Self> {
        Self::try_auto_with(driver).ok()
    }

    /// Like [`auto`](Self::auto), but reports which types were tried.
    pub fn try_auto() -> Result<Self> {
        Self::try_auto_with(&SystemDriver)
    }

    /// Like [`auto_with`](Self::auto_with), but reports which types were tried.
    pub fn try_auto_with(driver: &dyn DeviceDriver) -> Result<Self> {
        let mut tried = Vec::new();
        for device_type in probe_order_for(&driver.supported_types()) {
            match Self::create_with(driver, device_type) {
                Ok(ctx) => return Ok(ctx),
                Err(e) => {
                    debug!(device = %device_type, error = %e, "probe failed");
                    tried.push(device_type);
                }
            }
        }
        info!(?tried, driver = driver.name(), "no hardware device available");
        Err(HwAccelError::NoDevicesAvailable { tried })
    }

    /// Unique id of this context. Surfaces carry it as their device id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Device type.
    pub fn device_type(&self) -> HwDeviceType {
        self.inner.device_type
    }

    /// Driver supplied device description.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Check whether two handles refer to the same device.
    pub fn same_device(&self, other: &HardwareContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a stage as a user of this device.
    ///
    /// Attaching an already attached stage is a no-op.
    pub fn attach(&self, stage: StageId) -> Result<()> {
        let mut attached = self.inner.attached.lock();
        if self.is_disposed() {
            return Err(HwAccelError::Disposed(self.inner.id));
        }
        if attached.insert(stage) {
            debug!(context = self.inner.id, %stage, live = attached.len(), "stage attached");
        }
        Ok(())
    }

    /// Unregister a stage. Releases the device when it was the last one.
    ///
    /// Returns `false` if the stage was not attached, in which case nothing
    /// changes.
    pub fn detach(&self, stage: StageId) -> bool {
        let mut attached = self.inner.attached.lock();
        if !attached.remove(&stage) {
            warn!(context = self.inner.id, %stage, "detach of a stage that is not attached");
            return false;
        }
        debug!(context = self.inner.id, %stage, live = attached.len(), "stage detached");
        if attached.is_empty() {
            self.inner.dispose_once("last stage detached");
        }
        true
    }

    /// Release the device now, regardless of attached stages.
    ///
    /// Returns `true` if this call released it.
    pub fn dispose(&self) -> bool {
        let _attached = self.inner.attached.lock();
        self.inner.dispose_once("disposed by owner")
    }

    /// Check whether the device was released.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Number of attached stages.
    pub fn live_count(&self) -> usize {
        self.inner.attached.lock().len()
    }

    /// Geometry and formats the device accepts for frame pools.
    pub fn get_hardware_frames_constraints(&self) -> Result<FramesConstraints> {
        self.ensure_live()?;
        Ok(self.inner.constraints.clone())
    }

    /// Set up the context's frame pool.
    ///
    /// Identical parameters return the current pool. Different parameters
    /// replace it; the old pool is retired but frames already taken from it
    /// stay valid until dropped.
    pub fn derive_frames_context(&self, params: HwFramesParams) -> Result<Arc<HwFramesContext>> {
        self.check_frames_params(&params)?;
        let mut frames = self.inner.frames.lock();
        // Release takes the pools under this lock after setting the flag.
        self.ensure_live()?;
        if let Some(current) = frames.as_ref() {
            if *current.params() == params && current.is_active() {
                return Ok(current.clone());
            }
        }
        let pool = HwFramesContext::new(self.inner.id, self.inner.device_type, params);
        if let Some(old) = frames.replace(pool.clone()) {
            debug!(context = self.inner.id, old = old.id(), new = pool.id(), "frames context replaced");
            old.retire();
        }
        Ok(pool)
    }

    /// Create a pool independent of the context's own, e.g. for a filter
    /// that uploads at a different geometry. Retired when the device is released.
    pub fn new_frames_context(&self, params: HwFramesParams) -> Result<Arc<HwFramesContext>> {
        self.check_frames_params(&params)?;
        let mut extra = self.inner.extra_pools.lock();
        self.ensure_live()?;
        let pool = HwFramesContext::new(self.inner.id, self.inner.device_type, params);
        extra.retain(|p| p.strong_count() > 0);
        extra.push(Arc::downgrade(&pool));
        Ok(pool)
    }

    /// The context's current frame pool.
    pub fn frames_context(&self) -> Option<Arc<HwFramesContext>> {
        self.inner.frames.lock().clone()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(HwAccelError::Disposed(self.inner.id));
        }
        Ok(())
    }

    fn check_frames_params(&self, params: &HwFramesParams) -> Result<()> {
        self.ensure_live()?;
        params.validate(self.inner.device_type, &self.inner.constraints)?;
        Ok(())
    }
}

impl fmt::Debug for HardwareContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareContext")
            .field("id", &self.inner.id)
            .field("device_type", &self.inner.device_type)
            .field("live", &self.live_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
