/*
Copyright 2024 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Runs `check` right away and then once per interval until it yields a
/// value, the timeout elapses or `cancel` fires.
///
/// `Ok(None)` means "not ready yet". Any `Err` from `check` is treated as
/// transient: it is logged and retried, and only reported as part of the
/// [`Error::DeadlineExceeded`] returned once the timeout is reached. A check
/// still running at the deadline is abandoned.
pub async fn poll_immediate<T, F, Fut>(
    settings: PollSettings,
    cancel: &CancellationToken,
    what: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start + settings.timeout;
    let mut last_error: Option<String> = None;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(what.to_string())),
            outcome = timeout_at(deadline, check()) => outcome,
        };

        match outcome {
            Ok(Ok(Some(value))) => return Ok(value),
            Ok(Ok(None)) => debug!(
                "still waiting for {what} (elapsed: {:?}s, timeout: {:?})",
                start.elapsed().as_secs(),
                settings.timeout
            ),
            Ok(Err(error)) => {
                warn!("transient error while waiting for {what}: {error}");
                last_error = Some(error.to_string());
            }
            Err(_) => {
                warn!("check for {what} did not complete before the deadline");
                last_error = Some("check did not complete before the deadline".to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::DeadlineExceeded {
                what: what.to_string(),
                timeout: settings.timeout,
                last_error,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(what.to_string())),
            _ = sleep(settings.interval.min(deadline - now)) => {}
        }
    }
}
