//! Process-wide tokio runtime backing the blocking API in [`crate::sync`].

use std::sync::OnceLock;
use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Returns the shared runtime, creating it on first use.
pub fn get() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tuyaface")
            .enable_all()
            .build()
            .expect("Failed to build tuyaface runtime")
    })
}
