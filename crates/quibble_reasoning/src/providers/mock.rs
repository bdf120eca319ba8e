//! Mock generative backend: deterministic replies without network access.

use crate::backend::{GenerationRequest, GenerativeBackend};
use async_trait::async_trait;
use quibble_core::BackendError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
enum Mode {
    /// Reply with the user prompt.
    Echo,
    /// Pop scripted results; once empty, echo.
    Scripted(Mutex<VecDeque<Result<String, BackendError>>>),
    /// Fail every call with the same error.
    Failing(BackendError),
}

#[derive(Debug)]
pub struct MockBackend {
    mode: Mode,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn echo() -> Self {
        Self::with_mode(Mode::Echo)
    }

    pub fn scripted(results: Vec<Result<String, BackendError>>) -> Self {
        Self::with_mode(Mode::Scripted(Mutex::new(results.into())))
    }

    pub fn failing(error: BackendError) -> Self {
        Self::with_mode(Mode::Failing(error))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let echo = || Ok(format!("(mock {}) {}", request.model, request.user_prompt));
        match &self.mode {
            Mode::Echo => echo(),
            Mode::Failing(e) => Err(e.clone()),
            Mode::Scripted(queue) => {
                let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                next.unwrap_or_else(echo)
            }
        }
    }
}
