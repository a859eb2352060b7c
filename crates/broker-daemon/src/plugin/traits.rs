use super::{PluginContext, PluginError, PluginMetadata};
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Core plugin trait. All daemon plugins implement this.
///
/// Lifecycle: init() → run() → shutdown(). `run()` owns the plugin's
/// long-lived loop and must return once `cancel` is triggered.
///
/// Uses RPITIT (Return Position Impl Trait in Traits) with explicit Send bounds.
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    fn init(
        &mut self,
        ctx: &PluginContext,
    ) -> impl Future<Output = Result<(), PluginError>> + Send;

    fn run(
        &mut self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), PluginError>> + Send;

    fn shutdown(&mut self) -> impl Future<Output = Result<(), PluginError>> + Send;
}

/// Object-safe version of [`Plugin`] for type erasure in the registry.
pub trait ErasedPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;
    fn init<'a>(
        &'a mut self,
        ctx: &'a PluginContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;
    fn run<'a>(
        &'a mut self,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;
    fn shutdown<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;
}

impl<T: Plugin> ErasedPlugin for T {
    fn metadata(&self) -> PluginMetadata {
        Plugin::metadata(self)
    }

    fn init<'a>(
        &'a mut self,
        ctx: &'a PluginContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(Plugin::init(self, ctx))
    }

    fn run<'a>(
        &'a mut self,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(Plugin::run(self, cancel))
    }

    fn shutdown<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(Plugin::shutdown(self))
    }
}
