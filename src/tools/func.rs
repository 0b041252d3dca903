//! Closure-backed tools for embedding doe in another program.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::Tool;
use crate::domain::FailureCause;

/// A tool backed by an async closure
pub struct FnTool<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FailureCause>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Build the tool behind an `Arc<dyn Tool>`, ready for a binding
    pub fn shared(name: impl Into<String>, f: F) -> Arc<dyn Tool> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FailureCause>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, inputs: Value) -> Result<Value, FailureCause> {
        (self.f)(inputs).await
    }
}
