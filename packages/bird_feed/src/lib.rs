//! Bluesky feed generator for bird photos.
//!
//! Posts arrive from the Jetstream firehose, their images are sent to an
//! external classifier, and accepted posts land in a SQLite index together
//! with the likes and reposts that reference them. The HTTP side serves
//! ranked skeletons of that index over XRPC.
//!
//! Ingest: [`source`] → [`supervisor`] → [`dispatcher`] → [`enricher`] → [`repository`].
//! Serving: [`routes`] → [`feed`] → [`repository`].

pub mod classifier;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod enricher;
pub mod feed;
pub mod metrics;
pub mod repository;
pub mod routes;
pub mod session;
pub mod source;
pub mod supervisor;
pub mod xrpc;

#[cfg(test)]
mod test_support;
