//! # 存储协作方契约
//!
//! 发送引擎消费的外部协作方接口与内存实现。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：设备/连接/数据集/发送日志的异步 Trait 接口
//! 2. **数据模型层** (`models.rs`)：存储相关的数据结构
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 4. **实现层**：
//!    - `in_memory/`：内存实现（用于演示、测试，以及无外部依赖的单机部署）
//!
//! ## 设计约束
//!
//! - 引擎只通过 trait 访问数据，不关心后端形态
//! - 连接配置中的敏感字段在进入本层前已解密，引擎不落盘任何密钥
//! - 发送日志为仅追加写入，单次尝试一条记录，写入后不可变

pub mod error;
pub mod in_memory;
pub mod models;
pub mod traits;

pub use error::*;
pub use models::*;
pub use traits::*;

pub use in_memory::{
    InMemoryConnectionStore, InMemoryDatasetStore, InMemoryDeviceStore, InMemoryTransmissionLog,
};
