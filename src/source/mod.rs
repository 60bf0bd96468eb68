//! Metric sources polled by the scheduler
//!
//! A source is anything that can be asked for "the samples right now". The
//! scheduler only sees the [`MetricSource`] trait; how a source talks to its
//! provider is its own business.
//!
//! ## Sources
//!
//! - [`prospector::ProspectorSource`]: CloudWatch-style statistics for a group
//!   of metrics, fetched through a [`prospector::StatisticsProvider`]
//! - [`http::HttpStatisticsProvider`]: statistics provider talking JSON to a
//!   gateway endpoint
//! - [`system::SystemSource`]: cpu, memory and load of the local host

pub mod error;
pub mod http;
pub mod prospector;
pub mod system;

use async_trait::async_trait;

pub use error::{AdapterError, AdapterResult, ErrorKind};

use crate::MetricSample;

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Fetch the current samples.
    ///
    /// Errors are treated as transient (retry on the next tick) unless the
    /// source classifies them as [`ErrorKind::Permanent`].
    async fn poll(&self) -> AdapterResult<Vec<MetricSample>>;
}
