//! docpipe - resumable acquisition pipeline for paginated document-listing sites.
//!
//! The pipeline runs in three independently re-entrant stages: discovery
//! upserts documents into a durable SQLite store, the download stage claims
//! pending documents and fetches them with bounded concurrency, and the
//! extract stage (synchronous, or asynchronous via a lease-based job queue)
//! turns downloaded files into text and table output. Every stage drives its
//! work off the store's per-document state machine, so re-running a stage
//! only processes documents that still need it.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod extractors;
pub mod http_client;
pub mod models;
pub mod queue;
pub mod repository;
pub mod server;
pub mod services;
pub mod sink;
