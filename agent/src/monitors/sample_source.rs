// File: agent/src/monitors/sample_source.rs
//
// The seam between a monitor and the macOS-specific data-collection shim that
// actually parses system_profiler/ioreg/pmset/airport output. The core only
// ever depends on this trait; the parsing itself is out of scope and is
// represented here as a pluggable producer.
use async_trait::async_trait;

#[async_trait]
pub trait SampleSource: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;

    /// Produces one sample, or `Ok(None)` for "no data this cycle" (binary
    /// missing, probe timed out, rate-limited).
    async fn sample(&self) -> anyhow::Result<Option<Self::Record>>;
}

/// Test double returning a fixed sequence of canned records, cycling once
/// exhausted. Lets monitor-framework behavior (scheduling, rate limiting,
/// CSV persistence) be exercised without shelling out to platform tooling.
#[cfg(test)]
pub struct FakeSampleSource<R: Clone + Send + Sync + 'static> {
    samples: tokio::sync::Mutex<std::collections::VecDeque<Option<R>>>,
}

#[cfg(test)]
impl<R: Clone + Send + Sync + 'static> FakeSampleSource<R> {
    pub fn new(samples: Vec<Option<R>>) -> Self {
        Self {
            samples: tokio::sync::Mutex::new(samples.into()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl<R: Clone + Send + Sync + 'static> SampleSource for FakeSampleSource<R> {
    type Record = R;

    async fn sample(&self) -> anyhow::Result<Option<R>> {
        let mut guard = self.samples.lock().await;
        Ok(guard.pop_front().flatten())
    }
}
