//! 文档数据库网关公共模块
//!
//! 提供各服务共享的基础设施：
//! - 配置加载
//! - 统一错误类型与响应格式
//! - 中间件与请求提取器
//! - 共享数据模型

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
