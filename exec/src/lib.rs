#![allow(
    non_camel_case_types,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]

pub mod alloc;
pub mod device;
pub mod event;
pub mod kernel;
pub mod model;

pub use alloc::{DeviceBuffer, Readback};
pub use device::Device;
pub use event::{Event, Events, Profiling};
pub use kernel::{BatchedGemm, GemmArgs};
pub use model::{from_transpose_enum, to_transpose_enum, DeviceKind, Properties, Transposition};

fn human_bytes(num_bytes: &u64) -> String {
    human_bytes::human_bytes(*num_bytes as f64)
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("failed to allocate {} ({} available)", human_bytes(.requested), human_bytes(.available))]
    Allocation { requested: u64, available: u64 },

    #[error("allocation {id} is not live")]
    InvalidBuffer { id: usize },

    #[error("range of {len} elements at offset {offset} exceeds buffer of {capacity} elements")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("device command {command:?} faulted: {message}")]
    DeviceFault { command: String, message: String },

    #[error("device queue is closed")]
    QueueClosed,

    #[error("failed to set up device: {0}")]
    Setup(String),
}

impl Error {
    /// Whether the error is local to one measurement and the caller may
    /// continue with other work on the same device.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::DeviceFault { .. } | Self::OutOfBounds { .. }
        )
    }
}

#[cfg(test)]
pub mod tests {
    static INIT: std::sync::Once = std::sync::Once::new();

    pub fn init_test() {
        INIT.call_once(|| {
            env_logger::builder().is_test(true).init();
            color_eyre::install().unwrap();
        });
    }
}
