//! Bookstore Common - 跨模块共享工具与数据结构
//!
//! 该模块提供 Bookstore Operator 中各组件共享的数据结构和错误处理机制，
//! 包括 Helm 发布（release）、Chart 元数据以及发布动作的判定逻辑。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::chart::*;
pub use models::release::*;
