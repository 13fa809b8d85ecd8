//! Closure-backed probes.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CheckResult, Probe};

/// Probe implementation using a closure.
pub struct FnProbe<F> {
    check_fn: F,
    description: String,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<CheckResult, String>> + Send,
{
    pub fn new(check_fn: F) -> Self {
        Self {
            check_fn,
            description: "closure probe".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<CheckResult, String>> + Send,
{
    async fn check(&self) -> Result<CheckResult, String> {
        (self.check_fn)().await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Create a shared probe from a closure.
pub fn probe_fn<F, Fut>(check_fn: F) -> Arc<dyn Probe>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CheckResult, String>> + Send + 'static,
{
    Arc::new(FnProbe::new(check_fn))
}
