#![cfg_attr(docsrs, feature(doc_cfg))]

//! A render-strategy engine and live-state sync fabric for server-driven reactive UIs.
//!
//! Wavefront serves pages under a per-route rendering strategy (SSR, SSG, ISR, PPR),
//! backed by a page cache with FIFO eviction and optional TTL, and keeps connected
//! clients live via a WebSocket state-sync hub: diffed/compressed snapshot-and-patch
//! delivery, server-dispatched actions, and a pub/sub bridge so broadcasts fan out
//! identically whether a deployment is one process or many.
//!
//! # High-level features
//! - [registry::RouteRegistry] resolves a path to a page, its layout chain, and its
//!   rendering strategy ([registry::Strategy]).
//! - [cache::PageCache] and [cache::ShellCache] hold rendered HTML and PPR shells with
//!   atomic replace semantics, FIFO eviction, and optional hard TTL.
//! - [revalidate::RevalidationScheduler] runs ISR rebuilds and PPR shell builds
//!   single-flight, bounded by a global concurrency semaphore.
//! - [storage::Storage] pluggable backing store for cache entries, defaulting to an
//!   in-memory implementation.
//! - [hub::StateSyncHub] manages WebSocket sessions, action dispatch, and diffed state
//!   delivery; [admission::AdmissionControl] token-bucket gates new connections.
//! - [pubsub::PubSub] fans broadcasts out in-process or through an external backend —
//!   the hub takes the identical code path either way.
//! - [config] holds per-subsystem configuration with `envy`-backed environment overrides.
//! - [error] defines a `thiserror` enum per subsystem, each implementing [responder::Responder].
//!
//! Routing, extractors, the `Responder` trait, middleware, WebSocket upgrade handling,
//! and the HTTP server loop are the ambient framework layer these subsystems are built
//! on; see [router], [extractors], [responder], [middleware], [ws], and `serve`.
//!
//! # Compatibility
//! - Runtime: `tokio`
//! - HTTP: `hyper` 1.x
//!
//! # Feature flags
//! - `plugins` — rate limiting, reused to gate WebSocket admission (default-on)
//! - `wavefront-tracing` — structured tracing subscriber

/// WebSocket admission control (token bucket per source address), part of C5.
pub mod admission;

/// Remote action HTTP endpoint (`POST /<remote-prefix>/:name`).
pub mod action;

/// HTTP request and response body handling utilities.
pub mod body;

/// Page Cache and Shell Cache (C3): atomic HTML caching with FIFO eviction and TTL.
pub mod cache;

/// Typed configuration for every subsystem, with `envy`-backed environment overrides.
pub mod config;

/// Two-stage CSRF protection (issuer + validator) for the remote action endpoint.
pub mod csrf;

/// Per-subsystem error taxonomy; each error type implements [responder::Responder].
pub mod error;

/// Render Orchestrator (C2): strategy dispatch, layout composition, and slot splicing.
pub mod orchestrator;

/// Pub/Sub Bridge (C6): in-process or externally-backed broadcast fan-out.
pub mod pubsub;

/// Route Registry (C1): path matching, layout chains, and per-route strategy.
pub mod registry;

/// Revalidation Scheduler (C4): single-flight ISR rebuilds and PPR shell builds.
pub mod revalidate;

/// Storage abstraction backing the Page Cache, defaulting to an in-memory store.
pub mod storage;

/// State Sync Hub (C5): WebSocket sessions, action dispatch, diff/compression transport.
pub mod hub;

/// Request data extraction utilities for parsing query params, JSON, and more.
pub mod extractors;

/// Request handler traits and implementations.
mod handler;

/// Middleware for processing requests and responses in a pipeline.
pub mod middleware;

/// Plugin system for extending framework functionality.
#[cfg(feature = "plugins")]
#[cfg_attr(docsrs, doc(cfg(feature = "plugins")))]
pub mod plugins;

/// Response generation utilities and traits.
pub mod responder;

/// Route definition and matching logic.
mod route;

/// Request routing and dispatch functionality.
pub mod router;

/// HTTP server implementation and configuration.
mod server;

/// Application state management and dependency injection.
pub mod state;

/// In-process signal arbiter for custom events.
pub mod signals;

/// Distributed tracing integration for observability.
#[cfg(feature = "wavefront-tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "wavefront-tracing")))]
pub mod tracing;

/// Core type definitions used throughout the framework.
pub mod types;

/// WebSocket connection handling and message processing.
pub mod ws;

pub use bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use http_body_util::Full;

/// Starts the HTTP server with the given listener and router.
///
/// This is the main entry point for starting a Wavefront web server. The function takes
/// ownership of a TCP listener and router, then serves incoming connections until
/// the server is shut down.
///
/// # Examples
///
/// ```rust,no_run
/// use wavefront::{serve, router::Router};
/// use tokio::net::TcpListener;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let router = Router::new();
/// serve(listener, router).await;
/// # Ok(())
/// # }
/// ```
pub use server::serve;
