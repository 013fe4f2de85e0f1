//! 日志初始化
//!
//! 库内部只通过 tracing 宏输出，这里提供给二进制与测试入口的订阅器装配。
//! RUST_LOG 可按模块覆盖默认级别。

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// 以 INFO 为默认级别初始化全局日志订阅器，重复调用无害
pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// 指定默认级别初始化
pub fn init_with_level(level: LevelFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init();
}
