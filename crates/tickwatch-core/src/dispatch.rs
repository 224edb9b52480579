//! Long-lived bridge between callers and a [`Sender`].
//!
//! One `Dispatcher` is built at startup and shared through `Arc` by every
//! rule. Async callers use [`Dispatcher::send`]; code that is not running on
//! a runtime uses [`Dispatcher::send_blocking`], which drives the send on a
//! private current-thread runtime created on first use and kept until
//! [`Dispatcher::shutdown`] or drop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tracing::debug;

use crate::sender::{SendError, Sender};

pub struct Dispatcher {
    sender: Arc<dyn Sender>,
    send_timeout: Duration,
    fallback: Mutex<Option<Runtime>>,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn Sender>, send_timeout: Duration) -> Self {
        Self {
            sender,
            send_timeout,
            fallback: Mutex::new(None),
        }
    }

    pub fn sender_name(&self) -> &'static str {
        self.sender.name()
    }

    /// Send with the configured timeout.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        match tokio::time::timeout(self.send_timeout, self.sender.send(text)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout {
                timeout_ms: u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Send from synchronous code.
    ///
    /// On a multi-thread runtime the current worker is handed off with
    /// `block_in_place`. With no runtime the private fallback runtime is
    /// used. Inside a current-thread runtime blocking would deadlock, so the
    /// call is refused with [`SendError::BlockingInAsyncContext`].
    pub fn send_blocking(&self, text: &str) -> Result<(), SendError> {
        if let Ok(handle) = Handle::try_current() {
            return match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| handle.block_on(self.send(text)))
                }
                _ => Err(SendError::BlockingInAsyncContext),
            };
        }

        let mut fallback = self.fallback.lock().unwrap_or_else(PoisonError::into_inner);
        if fallback.is_none() {
            debug!(sender = self.sender.name(), "starting dispatch runtime");
            let runtime = Builder::new_current_thread()
                .enable_all()
                .thread_name("tickwatch-dispatch")
                .build()
                .map_err(|error| SendError::Runtime(error.to_string()))?;
            *fallback = Some(runtime);
        }

        match fallback.as_ref() {
            Some(runtime) => runtime.block_on(self.send(text)),
            None => Err(SendError::Runtime(String::from("dispatch runtime unavailable"))),
        }
    }

    /// Whether the private runtime has been started.
    pub fn has_fallback_runtime(&self) -> bool {
        self.fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Dispose of the private runtime. Safe to call from any context and more
    /// than once; a later `send_blocking` starts a new one.
    pub fn shutdown(&self) {
        let runtime = self
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            debug!(sender = self.sender.name(), "stopping dispatch runtime");
            runtime.shutdown_background();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let runtime = self
            .fallback
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sender", &self.sender.name())
            .field("send_timeout", &self.send_timeout)
            .field("fallback_runtime", &self.has_fallback_runtime())
            .finish()
    }
}
