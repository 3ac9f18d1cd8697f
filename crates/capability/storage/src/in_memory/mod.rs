//! 内存存储实现模块
//!
//! 用于本地演示、测试和无外部依赖的单机部署。
//!
//! 包含以下实现：
//! - DeviceStore: InMemoryDeviceStore
//! - ConnectionStore: InMemoryConnectionStore
//! - DatasetReader: InMemoryDatasetStore
//! - TransmissionLogStore: InMemoryTransmissionLog

pub mod connection;
pub mod dataset;
pub mod device;
pub mod transmission_log;

pub use connection::*;
pub use dataset::*;
pub use device::*;
pub use transmission_log::*;
