//! Application plugins.
//!
//! Two cooperating pieces: [`Plugins`], a type-keyed map of shared values
//! carried on every request (database handles, caches, config), and
//! [`PluginHooks`], an ordered registry of lifecycle hooks that observe the
//! dispatch pipeline. Both are populated during setup and frozen once the
//! server starts.

use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use crate::http::{Request, Response};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Debug, Clone)]
pub struct Plugins {
    data: Arc<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self {
            data: Arc::new(HashMap::new()),
        }
    }

    pub(crate) fn insert<T: 'static + Send + Sync>(&mut self, value: T) {
        Arc::get_mut(&mut self.data)
            .expect("Cannot modify state after application start")
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }
}

/// Lifecycle hooks observing the dispatch pipeline.
///
/// `on_request` fires for every request; `on_context` additionally fires when
/// the application runs in context mode, so both are invoked for one request,
/// by design. `on_route` fires once a route has matched, `on_response` just
/// before the response is written.
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Names of plugins that must be registered first.
    fn dependencies(&self) -> &[&str] {
        &[]
    }

    fn on_request(&self, _req: &mut Request) {}

    fn on_context(&self, _ctx: &Context) {}

    fn on_route(&self, _pattern: &str) {}

    fn on_response(&self, _response: &mut Response) {}
}

#[derive(Clone, Default)]
pub struct PluginHooks {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration-time validation: duplicate names and missing
    /// dependencies are setup failures, fatal before `listen`.
    pub fn register(&mut self, plugin: impl Plugin) -> ServerResult<()> {
        let name = plugin.name().to_string();
        if self.plugins.iter().any(|p| p.name() == name) {
            return Err(ServerError::SetupError(format!(
                "duplicate plugin name: {}",
                name
            )));
        }
        for dependency in plugin.dependencies() {
            if !self.plugins.iter().any(|p| p.name() == *dependency) {
                return Err(ServerError::SetupError(format!(
                    "plugin {} requires {}, which is not registered",
                    name, dependency
                )));
            }
        }
        self.plugins.push(Arc::new(plugin));
        Ok(())
    }

    pub(crate) fn run_request_hooks(&self, req: &mut Request) {
        for plugin in &self.plugins {
            plugin.on_request(req);
        }
    }

    pub(crate) fn run_context_hooks(&self, ctx: &Context) {
        for plugin in &self.plugins {
            plugin.on_context(ctx);
        }
    }

    pub(crate) fn run_route_hooks(&self, pattern: &str) {
        for plugin in &self.plugins {
            plugin.on_route(pattern);
        }
    }

    pub(crate) fn run_response_hooks(&self, response: &mut Response) {
        for plugin in &self.plugins {
            plugin.on_response(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    struct Named(&'static str, &'static [&'static str]);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn dependencies(&self) -> &[&str] {
            self.1
        }

        fn on_request(&self, req: &mut Request) {
            req.set_data(self.0, true);
        }
    }

    #[test]
    fn type_map_round_trips_values() {
        #[derive(Debug, PartialEq)]
        struct Config(u32);
        let mut plugins = Plugins::new();
        plugins.insert(Config(7));
        assert_eq!(plugins.get::<Config>(), Some(&Config(7)));
        assert!(plugins.get::<String>().is_none());
    }

    #[test]
    fn duplicate_plugin_names_fail_registration() {
        let mut hooks = PluginHooks::new();
        hooks.register(Named("metrics", &[])).unwrap();
        let err = hooks.register(Named("metrics", &[])).unwrap_err();
        assert!(matches!(err, ServerError::SetupError(_)));
    }

    #[test]
    fn missing_dependencies_fail_registration() {
        let mut hooks = PluginHooks::new();
        let err = hooks.register(Named("auth", &["sessions"])).unwrap_err();
        assert!(matches!(err, ServerError::SetupError(_)));

        hooks.register(Named("sessions", &[])).unwrap();
        hooks.register(Named("auth", &["sessions"])).unwrap();
    }

    #[test]
    fn request_hooks_run_in_registration_order() {
        let mut hooks = PluginHooks::new();
        hooks.register(Named("a", &[])).unwrap();
        hooks.register(Named("b", &[])).unwrap();
        let mut req = Request::new(Method::GET, "/");
        hooks.run_request_hooks(&mut req);
        assert!(req.get_data("a").is_some());
        assert!(req.get_data("b").is_some());
    }
}
