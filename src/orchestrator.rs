//! Render Orchestrator (C2): resolves a route, picks its effective strategy, and
//! drives SSR/SSG/ISR/PPR dispatch per §4.2 — including layout composition, slot
//! splicing, and the response header policy in §6.
//!
//! Every dispatch path re-resolves the route by path through [`crate::registry::RouteRegistry::matches`]
//! rather than holding a borrow across an `await` or a spawned task: matching is a
//! lock-free read after registration seals, so the extra lookup costs nothing and keeps
//! background rebuild closures fully owned (`'static`).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::{PageCache, ShellCache};
use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::registry::{PageRoute, RenderContext, RouteRegistry, Strategy};
use crate::revalidate::{RevalidationScheduler, ShellBuildSlot};
use crate::signals::{self, Signal};
use crate::storage::Storage;

const TEXT_HTML: &str = "text/html; charset=utf-8";
const IMMUTABLE: &str = "public, max-age=31536000, immutable";
const NO_STORE: &str = "no-store";

/// A fully rendered page response: body bytes, content type, and the `Cache-Control`
/// value the strategy in play dictates.
pub struct RenderedPage {
    pub body: Bytes,
    pub content_type: &'static str,
    pub cache_control: String,
}

/// Canonical request fingerprint: `path` plus sorted query pairs, per §4.2. This is the
/// sole identity C3/C4 key off of — using only `path` would pollute cache entries
/// across distinct queries.
fn fingerprint(path: &str, query: &str) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    let canonical_query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{path}?{canonical_query}")
}

fn validate_shell_placeholders(shell: &str, slots: &[String]) -> Result<(), RenderError> {
    for name in slots {
        let marker = format!("<!--slot:{name}-->");
        if !shell.contains(&marker) {
            return Err(RenderError::MissingSlotPlaceholder(name.clone()));
        }
    }
    Ok(())
}

fn splice_slots(mut shell: String, fragments: &HashMap<String, String>) -> String {
    for (name, fragment) in fragments {
        let marker = format!("<!--slot:{name}-->");
        let replacement = format!(r#"<div data-slot="{name}">{fragment}</div>"#);
        shell = shell.replace(&marker, &replacement);
    }
    shell
}

/// Picks SSR/SSG/ISR/PPR per request and drives the cache, revalidation, and layout
/// composition required by each (C2).
pub struct RenderOrchestrator {
    registry: RouteRegistry,
    page_cache: PageCache,
    shell_cache: ShellCache,
    scheduler: RevalidationScheduler,
}

impl RenderOrchestrator {
    /// Builds an orchestrator with in-process caching, from a sealed [`RouteRegistry`].
    pub fn new(registry: RouteRegistry, config: RenderConfig) -> Arc<Self> {
        Arc::new(Self {
            page_cache: PageCache::new(config.cache),
            shell_cache: ShellCache::new(),
            scheduler: RevalidationScheduler::new(&config.revalidation),
            registry,
        })
    }

    /// Builds an orchestrator whose page and shell caches are backed by an external
    /// [`Storage`], for multi-process deployments.
    pub fn with_storage(
        registry: RouteRegistry,
        config: RenderConfig,
        storage: Arc<dyn Storage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            page_cache: PageCache::with_storage(config.cache, storage.clone()),
            shell_cache: ShellCache::with_storage(storage),
            scheduler: RevalidationScheduler::new(&config.revalidation),
            registry,
        })
    }

    /// Renders `path`, applying whichever strategy the matched route was registered
    /// with. `query` is the raw query string (no leading `?`).
    pub async fn render(self: &Arc<Self>, path: &str, query: &str) -> Result<RenderedPage, RenderError> {
        let strategy = {
            let (route, _) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
            route.options.strategy
        };
        let fp = fingerprint(path, query);

        match strategy {
            Strategy::Ssr => self.render_ssr(path).await,
            Strategy::Ssg => self.render_ssg(path, &fp).await,
            Strategy::Isr => self.render_isr(path, &fp).await,
            Strategy::Ppr => self.render_ppr(path, &fp).await,
        }
    }

    async fn compose(&self, route: &PageRoute, ctx: RenderContext) -> Result<String, RenderError> {
        let mut content = (route.page)(ctx.clone()).await?;
        for layout in self.registry.layout_chain(route).into_iter().rev() {
            content = layout(ctx.clone(), content).await?;
        }
        Ok(content)
    }

    async fn render_slots(
        &self,
        route: &PageRoute,
        ctx: &RenderContext,
    ) -> Result<HashMap<String, String>, RenderError> {
        let mut fragments = HashMap::with_capacity(route.options.dynamic_slots.len());
        for name in &route.options.dynamic_slots {
            let builder = route.slots.get(name).ok_or_else(|| {
                RenderError::RendererFailed(format!("no slot builder registered for {name:?}"))
            })?;
            fragments.insert(name.clone(), builder(ctx.clone()).await?);
        }
        Ok(fragments)
    }

    async fn render_ssr(&self, path: &str) -> Result<RenderedPage, RenderError> {
        let (route, params) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
        let ctx = RenderContext { path: path.to_string(), params, shell_build: false };
        let body = self.compose(route, ctx).await?;
        signals::app_signals().emit(Signal::new(ids::RENDER_SSR)).await;
        Ok(RenderedPage {
            body: Bytes::from(body),
            content_type: TEXT_HTML,
            cache_control: NO_STORE.to_string(),
        })
    }

    async fn render_ssg(&self, path: &str, fp: &str) -> Result<RenderedPage, RenderError> {
        if let Some(entry) = self.page_cache.get(fp).await? {
            return Ok(RenderedPage {
                body: entry.html,
                content_type: TEXT_HTML,
                cache_control: IMMUTABLE.to_string(),
            });
        }

        let (route, params) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
        let ctx = RenderContext { path: path.to_string(), params, shell_build: false };
        let body = Bytes::from(self.compose(route, ctx).await?);
        self.page_cache.put(fp, body.clone()).await?;

        Ok(RenderedPage { body, content_type: TEXT_HTML, cache_control: IMMUTABLE.to_string() })
    }

    async fn render_isr(self: &Arc<Self>, path: &str, fp: &str) -> Result<RenderedPage, RenderError> {
        let revalidate_after = {
            let (route, _) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
            route.options.revalidate_after
        };
        let cache_control = format!(
            "public, s-maxage={0}, stale-while-revalidate={0}",
            revalidate_after.as_secs()
        );

        if let Some(entry) = self.page_cache.get(fp).await? {
            if entry.age() >= revalidate_after {
                let orchestrator = self.clone();
                let path_owned = path.to_string();
                let fp_owned = fp.to_string();
                self.scheduler.schedule_isr(fp_owned.clone(), move || async move {
                    if let Err(_err) = orchestrator.rebuild_isr(&path_owned, &fp_owned).await {
                        signals::app_signals()
                            .emit(Signal::new(crate::revalidate::ids::ISR_FAILED))
                            .await;
                        return;
                    }
                    signals::app_signals()
                        .emit(Signal::new(crate::revalidate::ids::ISR_COMPLETED))
                        .await;
                });
            }
            return Ok(RenderedPage { body: entry.html, content_type: TEXT_HTML, cache_control });
        }

        let (route, params) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
        let ctx = RenderContext { path: path.to_string(), params, shell_build: false };
        let body = Bytes::from(self.compose(route, ctx).await?);
        self.page_cache.put(fp, body.clone()).await?;

        Ok(RenderedPage { body, content_type: TEXT_HTML, cache_control })
    }

    async fn rebuild_isr(self: &Arc<Self>, path: &str, fp: &str) -> Result<(), RenderError> {
        let (route, params) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
        let ctx = RenderContext { path: path.to_string(), params, shell_build: false };
        let body = self.compose(route, ctx).await?;
        self.page_cache.put(fp, Bytes::from(body)).await?;
        Ok(())
    }

    async fn render_ppr(self: &Arc<Self>, path: &str, fp: &str) -> Result<RenderedPage, RenderError> {
        let shell = match self.shell_cache.get(fp).await? {
            Some(shell) => Some(shell),
            None => self.obtain_shell(path, fp).await?,
        };

        let (route, params) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
        let ctx = RenderContext { path: path.to_string(), params, shell_build: false };

        let Some(shell) = shell else {
            // The build we were following raced past the wait window: render inline,
            // uncached, rather than block indefinitely (§4.2's fallback rule).
            let body = self.compose(route, ctx).await?;
            return Ok(RenderedPage {
                body: Bytes::from(body),
                content_type: TEXT_HTML,
                cache_control: NO_STORE.to_string(),
            });
        };

        let fragments = self.render_slots(route, &ctx).await?;
        let shell_str = String::from_utf8_lossy(&shell).into_owned();
        let spliced = splice_slots(shell_str, &fragments);

        Ok(RenderedPage { body: Bytes::from(spliced), content_type: TEXT_HTML, cache_control: NO_STORE.to_string() })
    }

    /// Returns the freshly built (or freshly awaited) shell bytes, or `None` if this
    /// caller was a follower whose wait window elapsed before the builder finished.
    async fn obtain_shell(self: &Arc<Self>, path: &str, fp: &str) -> Result<Option<Bytes>, RenderError> {
        match self.scheduler.try_begin_shell_build(fp) {
            ShellBuildSlot::Builder => {
                signals::app_signals()
                    .emit(Signal::new(crate::revalidate::ids::PPR_SHELL_STARTED))
                    .await;
                let result = self.build_shell_now(path, fp).await;
                // Always release the single-flight slot, even on failure, so a later
                // request can retry the build instead of every follower falling back
                // to an inline render forever.
                self.scheduler.finish_shell_build(fp);
                let bytes = result?;
                signals::app_signals()
                    .emit(Signal::new(crate::revalidate::ids::PPR_SHELL_COMPLETED))
                    .await;
                Ok(Some(bytes))
            }
            ShellBuildSlot::Follower => {
                if self.scheduler.wait_for_shell(fp).await {
                    Ok(self.shell_cache.get(fp).await?)
                } else {
                    signals::app_signals()
                        .emit(Signal::new(crate::revalidate::ids::PPR_SHELL_RACED))
                        .await;
                    Ok(None)
                }
            }
        }
    }

    async fn build_shell_now(&self, path: &str, fp: &str) -> Result<Bytes, RenderError> {
        let (route, params) = self.registry.matches(path).ok_or(RenderError::NotFound)?;
        let ctx = RenderContext { path: path.to_string(), params, shell_build: true };
        let shell_string = self.compose(route, ctx).await?;
        validate_shell_placeholders(&shell_string, &route.options.dynamic_slots)?;
        let bytes = Bytes::from(shell_string);
        self.shell_cache.put(fp, bytes.clone()).await?;
        Ok(bytes)
    }
}

/// Well-known signal ids emitted by the Render Orchestrator, for observability hooks (A1).
pub mod ids {
    pub const RENDER_SSR: &str = "render.ssr";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RouteOptions, RouteRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn page(body: &'static str) -> crate::registry::PageBuilder {
        Arc::new(move |_ctx| Box::pin(async move { Ok(body.to_string()) }))
    }

    #[tokio::test]
    async fn ssr_never_populates_the_page_cache() {
        let mut registry = RouteRegistry::new();
        registry.register_page("/p", page("hello"), RouteOptions::default());
        registry.seal();

        let orchestrator = RenderOrchestrator::new(registry, RenderConfig::default());
        let r1 = orchestrator.render("/p", "").await.unwrap();
        let r2 = orchestrator.render("/p", "").await.unwrap();

        assert_eq!(r1.cache_control, "no-store");
        assert_eq!(&r1.body[..], b"hello");
        assert_eq!(&r2.body[..], b"hello");
        assert_eq!(orchestrator.page_cache.len(), 0);
    }

    #[tokio::test]
    async fn ssg_second_request_is_served_from_cache() {
        let mut registry = RouteRegistry::new();
        registry.register_page(
            "/a",
            page("static"),
            RouteOptions { strategy: Strategy::Ssg, ..RouteOptions::default() },
        );
        registry.seal();

        let orchestrator = RenderOrchestrator::new(registry, RenderConfig::default());
        let r1 = orchestrator.render("/a", "").await.unwrap();
        assert_eq!(r1.cache_control, "public, max-age=31536000, immutable");
        assert_eq!(orchestrator.page_cache.len(), 1);

        let r2 = orchestrator.render("/a", "").await.unwrap();
        assert_eq!(&r2.body[..], &r1.body[..]);
    }

    #[tokio::test]
    async fn isr_stale_entry_triggers_exactly_one_background_rebuild() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let mut registry = RouteRegistry::new();
        registry.register_page(
            "/b",
            Arc::new(move |_ctx| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("render-{n}"))
                })
            }),
            RouteOptions {
                strategy: Strategy::Isr,
                revalidate_after: Duration::from_millis(20),
                ..RouteOptions::default()
            },
        );
        registry.seal();

        let orchestrator = RenderOrchestrator::new(registry, RenderConfig::default());
        let first = orchestrator.render("/b", "").await.unwrap();
        assert_eq!(&first.body[..], b"render-0");

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stale = orchestrator.render("/b", "").await.unwrap();
        assert_eq!(&stale.body[..], b"render-0", "stale entry is still served immediately");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "exactly one background rebuild ran");
    }

    #[tokio::test]
    async fn ppr_splices_configured_slot_and_removes_placeholder() {
        let mut registry = RouteRegistry::new();
        registry.register_page(
            "/c",
            page("<html><body><!--slot:feed--></body></html>"),
            RouteOptions {
                strategy: Strategy::Ppr,
                dynamic_slots: vec!["feed".to_string()],
                ..RouteOptions::default()
            },
        );
        registry.register_slot("/c", "feed", Arc::new(|_ctx| Box::pin(async move { Ok("HELLO".to_string()) })));
        registry.seal();

        let orchestrator = RenderOrchestrator::new(registry, RenderConfig::default());
        let rendered = orchestrator.render("/c", "").await.unwrap();
        let body = String::from_utf8(rendered.body.to_vec()).unwrap();

        assert!(body.contains(r#"<div data-slot="feed">HELLO</div>"#));
        assert!(!body.contains("<!--slot:feed-->"));
        assert_eq!(rendered.cache_control, "no-store");
    }

    #[tokio::test]
    async fn ppr_shell_is_built_exactly_once_under_concurrent_first_miss() {
        let shell_builds = Arc::new(AtomicUsize::new(0));
        let shell_builds_clone = shell_builds.clone();

        let mut registry = RouteRegistry::new();
        registry.register_page(
            "/d",
            Arc::new(move |ctx| {
                let shell_builds = shell_builds_clone.clone();
                Box::pin(async move {
                    if ctx.shell_build {
                        shell_builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok("<!--slot:feed-->".to_string())
                    } else {
                        Ok("inline".to_string())
                    }
                })
            }),
            RouteOptions {
                strategy: Strategy::Ppr,
                dynamic_slots: vec!["feed".to_string()],
                ..RouteOptions::default()
            },
        );
        registry.register_slot("/d", "feed", Arc::new(|_ctx| Box::pin(async move { Ok("X".to_string()) })));
        registry.seal();

        let orchestrator = RenderOrchestrator::new(registry, RenderConfig::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move { orchestrator.render("/d", "").await }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(shell_builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_placeholder_for_a_declared_slot_is_an_error() {
        let mut registry = RouteRegistry::new();
        registry.register_page(
            "/e",
            page("<html></html>"),
            RouteOptions {
                strategy: Strategy::Ppr,
                dynamic_slots: vec!["feed".to_string()],
                ..RouteOptions::default()
            },
        );
        registry.register_slot("/e", "feed", Arc::new(|_ctx| Box::pin(async move { Ok("X".to_string()) })));
        registry.seal();

        let orchestrator = RenderOrchestrator::new(registry, RenderConfig::default());
        let err = orchestrator.render("/e", "").await.unwrap_err();
        assert!(matches!(err, RenderError::MissingSlotPlaceholder(name) if name == "feed"));
    }

    #[test]
    fn fingerprint_sorts_query_pairs_canonically() {
        assert_eq!(fingerprint("/p", "b=2&a=1"), fingerprint("/p", "a=1&b=2"));
        assert_eq!(fingerprint("/p", ""), "/p");
    }
}
