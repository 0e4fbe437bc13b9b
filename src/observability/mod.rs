//! 可观测性：tracing 订阅器初始化
//!
//! 日志写 stderr，stdout 只留给 CLI 的 JSON 输出。默认级别 info，可通过 RUST_LOG 覆盖。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；已有订阅器时保留原有的，返回 false
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("global tracing subscriber already set, keeping it: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_keeps_existing_subscriber() {
        init();
        assert!(!init());
    }
}
