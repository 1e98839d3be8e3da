use std::io::Write;
use std::sync::Once;

use env_logger::Builder;

static INIT: Once = Once::new();

/// Wires `env_logger` with a timestamped `file:line` formatter, driven
/// by `RUST_LOG`. Guarded by a `Once` so callers (tests in particular,
/// each with their own `setup()` helper) can call this unconditionally
/// without panicking on a double-init the way a bare `Builder::init()`
/// would.
pub fn init() {
    INIT.call_once(|| {
        Builder::from_default_env()
            .format_timestamp_secs()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init()
            .ok();
    });
}
