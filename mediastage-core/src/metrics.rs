//! Optional metrics collection.
//!
//! With the `metrics` feature the macros forward to the `metrics` crate;
//! without it they evaluate their arguments and do nothing.
//!
//! ```toml
//! [dependencies]
//! mediastage-core = { version = "0.1", features = ["metrics"] }
//! ```
//!
//! Metric names used by the stages:
//! - `stage.submitted` - units accepted by a stage, labeled by `kind`
//! - `stage.busy` - submits rejected with `Busy`, labeled by `kind`
//! - `stage.produced` - units drained from a stage, labeled by `kind`
//! - `stage.buffered` - units a stage reports as buffered, labeled by `kind`
//! - `pipeline.packets_read` / `pipeline.packets_written` - pipeline traffic
//! - `pipeline.packet_size` - size in bytes of written packets

/// Record a counter metric (increments by given value).
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        $crate::__metrics::counter!($name).increment($value)
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        $crate::__metrics::counter!($name, $($label_key => $label_value),+).increment($value)
    };
}

#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        let _ = ($name, $value, $($label_key, $label_value),+);
    };
}

/// Record a gauge metric (absolute value).
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        $crate::__metrics::gauge!($name).set($value)
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        $crate::__metrics::gauge!($name, $($label_key => $label_value),+).set($value)
    };
}

#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        let _ = ($name, $value, $($label_key, $label_value),+);
    };
}

/// Record a histogram metric (distribution of values).
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! record_histogram {
    ($name:expr, $value:expr) => {
        $crate::__metrics::histogram!($name).record($value)
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        $crate::__metrics::histogram!($name, $($label_key => $label_value),+).record($value)
    };
}

#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! record_histogram {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        let _ = ($name, $value, $($label_key, $label_value),+);
    };
}

pub use record_counter;
pub use record_gauge;
pub use record_histogram;
