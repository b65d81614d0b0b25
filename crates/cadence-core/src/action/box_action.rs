//! BoxAction -- object-safe dynamic dispatch wrapper for UsableAction.
//!
//! Same blanket-impl pattern as `BoxEngine`: an object-safe `UsableActionDyn`
//! with boxed futures, implemented for every `T: UsableAction`.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::usable::{ActionContext, ActionError, UsableAction};

/// Object-safe version of [`UsableAction`] with boxed futures.
pub trait UsableActionDyn: Send + Sync {
    fn name(&self) -> &str;

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, ActionError>> + Send + 'a>>;
}

impl<T: UsableAction> UsableActionDyn for T {
    fn name(&self) -> &str {
        UsableAction::name(self)
    }

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Value>, ActionError>> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }
}

/// Type-erased usable action.
pub struct BoxAction {
    inner: Box<dyn UsableActionDyn>,
}

impl BoxAction {
    pub fn new<T: UsableAction + 'static>(action: T) -> Self {
        Self {
            inner: Box::new(action),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn run(&self, ctx: &ActionContext) -> Result<Option<Value>, ActionError> {
        self.inner.run_boxed(ctx).await
    }
}

impl std::fmt::Debug for BoxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAction").field("name", &self.name()).finish()
    }
}
