use std::io::Write;
use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax, e.g. "info" or
/// "tiny_rasterizer::device=trace" to trace every kernel launch.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Prefix records with the emitting thread, which tells the host thread
    /// apart from the `raster-worker` pool.
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        return Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            thread_names: true,
        };
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once, later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        if config.thread_names {
            builder.format(|buf, record| {
                let thread = std::thread::current();
                writeln!(
                    buf,
                    "[{} {} {}] {}",
                    record.level(),
                    thread.name().unwrap_or("unnamed"),
                    record.target(),
                    record.args()
                )
            });
        }

        builder.write_style(config.write_style);
        builder.init();

        log::debug!("logging initialized");
    });
}
