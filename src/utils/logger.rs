use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    let default_directive = if verbose {
        "vn_txn_extract=debug,info".to_string()
    } else {
        format!("vn_txn_extract={},warn", level.to_lowercase())
    };

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

pub fn init_cli_logger(level: &str, verbose: bool) {
    tracing_subscriber::registry()
        .with(build_filter(level, verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

pub fn init_json_logger(level: &str, verbose: bool) {
    tracing_subscriber::registry()
        .with(build_filter(level, verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .json(), // 方便日誌收集系統解析
        )
        .init();
}

/// 依設定選擇日誌格式
pub fn init_logger(level: &str, format: &str, verbose: bool) {
    if format.eq_ignore_ascii_case("json") {
        init_json_logger(level, verbose);
    } else {
        init_cli_logger(level, verbose);
    }
}
