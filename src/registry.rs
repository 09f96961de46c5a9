//! Route Registry (C1): maps URL patterns to page/layout/slot builders and per-route
//! rendering options.
//!
//! Registration is process-wide and must complete before serving begins; matching uses
//! `matchit`, already part of the framework's dependency manifest, so reads after
//! registration are lock-free. Patterns use `matchit`'s own syntax: `{name}` captures one
//! segment, `{*name}` captures the remainder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use matchit::Router as MatchRouter;

use crate::error::RenderError;

/// Rendering strategy for a registered page, per §2/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Render per request, never cache.
    Ssr,
    /// Render once, cache indefinitely.
    Ssg,
    /// Serve cached, revalidate in background after `RevalidateAfter`.
    Isr,
    /// Cache a static shell with placeholders; render dynamic fragments per request.
    Ppr,
}

/// Per-route options controlling how the Render Orchestrator treats a page.
#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub strategy: Strategy,
    pub revalidate_after: Duration,
    pub dynamic_slots: Vec<String>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Ssr,
            revalidate_after: Duration::from_secs(0),
            dynamic_slots: Vec::new(),
        }
    }
}

/// Context handed to page, layout, and slot builders.
///
/// `shell_build` is set only when the Render Orchestrator is asking the renderer to
/// produce a PPR shell: the renderer must then emit `<!--slot:NAME-->` in place of any
/// slot component instead of rendering it.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub path: String,
    pub params: HashMap<String, String>,
    pub shell_build: bool,
}

/// Renders the innermost page component for a request/shell-build.
pub type PageBuilder =
    Arc<dyn Fn(RenderContext) -> BoxFuture<'static, Result<String, RenderError>> + Send + Sync>;

/// Wraps already-rendered inner content with a layout.
pub type LayoutBuilder = Arc<
    dyn Fn(RenderContext, String) -> BoxFuture<'static, Result<String, RenderError>> + Send + Sync,
>;

/// Renders one named dynamic slot's fragment for a PPR page.
pub type SlotBuilder =
    Arc<dyn Fn(RenderContext) -> BoxFuture<'static, Result<String, RenderError>> + Send + Sync>;

/// One registered page: its layout chain (outermost first), page builder, options, and
/// any dynamic slot builders.
pub struct PageRoute {
    pub pattern: String,
    pub layouts: Vec<LayoutBuilder>,
    pub page: PageBuilder,
    pub options: RouteOptions,
    pub slots: HashMap<String, SlotBuilder>,
}

/// Process-wide registry of page routes, layouts, and slots (C1).
///
/// Registration must be complete before `Match` is called from the request path;
/// after that point reads are safe without external locking since `matchit::Router`
/// is only ever read through a shared reference.
pub struct RouteRegistry {
    matcher: MatchRouter<usize>,
    routes: Vec<PageRoute>,
    root_layout: Option<LayoutBuilder>,
    sealed: bool,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            matcher: MatchRouter::new(),
            routes: Vec::new(),
            root_layout: None,
            sealed: false,
        }
    }

    /// Registers a page at `pattern` with the given builder and options.
    ///
    /// # Panics
    /// Panics if called after [`RouteRegistry::seal`], or if `pattern` conflicts with an
    /// already-registered pattern — both are registration-time-only failures per §4.1's
    /// "fail loudly" contract.
    pub fn register_page(&mut self, pattern: &str, builder: PageBuilder, options: RouteOptions) {
        assert!(!self.sealed, "cannot register routes after the registry is sealed");

        let index = self.routes.len();
        self.matcher
            .insert(pattern, index)
            .unwrap_or_else(|e| panic!("route pattern conflict for {pattern:?}: {e}"));

        self.routes.push(PageRoute {
            pattern: pattern.to_string(),
            layouts: Vec::new(),
            page: builder,
            options,
            slots: HashMap::new(),
        });
    }

    /// Adds a layout to an already-registered page's chain (appended as the new
    /// outermost layout relative to layouts already present).
    pub fn register_layout(&mut self, pattern: &str, builder: LayoutBuilder) {
        assert!(!self.sealed, "cannot register layouts after the registry is sealed");
        let route = self.route_mut(pattern);
        route.layouts.insert(0, builder);
    }

    /// Registers a root layout, applied outside every page's own layout chain.
    pub fn register_root_layout(&mut self, builder: LayoutBuilder) {
        assert!(!self.sealed, "cannot register the root layout after the registry is sealed");
        self.root_layout = Some(builder);
    }

    /// Registers a builder for a named dynamic slot on a PPR route.
    pub fn register_slot(&mut self, pattern: &str, slot_name: &str, builder: SlotBuilder) {
        assert!(!self.sealed, "cannot register slots after the registry is sealed");
        let route = self.route_mut(pattern);
        route.slots.insert(slot_name.to_string(), builder);
    }

    fn route_mut(&mut self, pattern: &str) -> &mut PageRoute {
        self.routes
            .iter_mut()
            .find(|r| r.pattern == pattern)
            .unwrap_or_else(|| panic!("no route registered for pattern {pattern:?} yet"))
    }

    /// Marks registration complete. Subsequent registration calls panic.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Resolves a request path to its matched route and extracted path parameters.
    pub fn matches(&self, path: &str) -> Option<(&PageRoute, HashMap<String, String>)> {
        let matched = self.matcher.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some((&self.routes[*matched.value], params))
    }

    /// Returns a route's full layout chain, outermost first, including the root layout.
    pub fn layout_chain<'a>(&'a self, route: &'a PageRoute) -> Vec<&'a LayoutBuilder> {
        let mut chain: Vec<&LayoutBuilder> = Vec::with_capacity(route.layouts.len() + 1);
        if let Some(root) = &self.root_layout {
            chain.push(root);
        }
        chain.extend(route.layouts.iter());
        chain
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &'static str) -> PageBuilder {
        Arc::new(move |_ctx| Box::pin(async move { Ok(body.to_string()) }))
    }

    #[test]
    fn matches_static_and_param_routes() {
        let mut registry = RouteRegistry::new();
        registry.register_page("/users/{id}", page("user"), RouteOptions::default());
        registry.seal();

        let (route, params) = registry.matches("/users/42").unwrap();
        assert_eq!(route.pattern, "/users/{id}");
        assert_eq!(params.get("id"), Some(&"42".to_string()));
        assert!(registry.matches("/missing").is_none());
    }

    #[test]
    #[should_panic(expected = "conflict")]
    fn conflicting_patterns_fail_loudly() {
        let mut registry = RouteRegistry::new();
        registry.register_page("/a", page("one"), RouteOptions::default());
        registry.register_page("/a", page("two"), RouteOptions::default());
    }

    #[test]
    fn layout_chain_is_outermost_first() {
        let mut registry = RouteRegistry::new();
        registry.register_page("/p", page("page"), RouteOptions::default());
        registry.register_root_layout(Arc::new(|_ctx, inner| {
            Box::pin(async move { Ok(format!("root({inner})")) })
        }));
        registry.register_layout(
            "/p",
            Arc::new(|_ctx, inner| Box::pin(async move { Ok(format!("inner({inner})")) })),
        );
        registry.seal();

        let (route, _) = registry.matches("/p").unwrap();
        let chain = registry.layout_chain(route);
        assert_eq!(chain.len(), 2);
    }
}
