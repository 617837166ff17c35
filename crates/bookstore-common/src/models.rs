//! 数据模型模块
//!
//! 该模块定义了 Operator 与 Helm 交互时使用的核心数据模型，
//! 并提供序列化/反序列化功能。

pub mod chart;
pub mod release;
