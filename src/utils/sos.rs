use once_cell::sync::Lazy;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop request.
///
/// Flips from `false` to `true` once; clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct SignalOfStop {
    closing: Arc<AtomicBool>,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop::default()
    }

    pub fn cancel(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

static INSTANCE: Lazy<SignalOfStop> = Lazy::new(SignalOfStop::new);

/// Process-wide signal, set by the Ctrl+C handler.
pub fn get_instance() -> SignalOfStop {
    INSTANCE.clone()
}
