use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Initialize the process-wide logger. `RUST_LOG` overrides the default
/// info level; output goes to stdout so it interleaves with the REPL.
pub fn setup_logging() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Utc::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
