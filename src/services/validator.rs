use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tokio::task::JoinSet;
use url::Url;

use crate::error::{PipelineError, Result};
use crate::models::{Collection, ValidationResults, Verdict};
use crate::services::fingerprint::Fingerprinter;
use crate::services::prober::{ProbeReport, Prober, Reachability};

/// Default worker pool size
pub const DEFAULT_CONCURRENCY: usize = 200;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub concurrency: usize,
    pub probe_timeout: Duration,
    /// Entries still unprobed when this elapses are marked unreachable
    pub run_deadline: Option<Duration>,
    /// Distinct hosts refusing connections, with no host answering, before the run is aborted; 0 disables
    pub fatal_failure_threshold: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            probe_timeout: Duration::from_secs(10),
            run_deadline: None,
            fatal_failure_threshold: 64,
        }
    }
}

#[derive(Debug)]
pub struct ValidationOutcome {
    pub results: Arc<ValidationResults>,
    /// Entries marked unreachable by the deadline instead of a probe
    pub forced_unreachable: usize,
    pub elapsed: Duration,
}

/// Shared state between workers
struct WorkQueue {
    jobs: Vec<(String, String)>,
    cursor: AtomicUsize,
    results: Arc<ValidationResults>,
    reach: Reachability,
    failed_hosts: DashSet<String>,
    aborted: AtomicBool,
}

impl WorkQueue {
    fn next_job(&self) -> Option<&(String, String)> {
        if self.aborted.load(Ordering::Relaxed) {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.jobs.get(idx)
    }

    /// Track transport health; true once enough distinct hosts failed and none answered
    fn note(&self, url: &str, report: &ProbeReport, threshold: usize) -> bool {
        if report.reached_host {
            self.reach.mark();
            return false;
        }
        // Timeouts and malformed URLs say nothing about the network path
        if report.verdict != Verdict::Unreachable {
            return false;
        }
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
            return false;
        };
        self.failed_hosts.insert(host);
        threshold > 0 && self.failed_hosts.len() >= threshold && !self.reach.any()
    }
}

/// Probes every entry with a fixed pool of workers
pub struct Validator {
    prober: Arc<dyn Prober>,
    fingerprinter: Fingerprinter,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(prober: Arc<dyn Prober>, fingerprinter: Fingerprinter, config: ValidatorConfig) -> Self {
        Self {
            prober,
            fingerprinter,
            config,
        }
    }

    /// Assign exactly one verdict to every fingerprint in the collection
    pub async fn validate(&self, collection: &Collection) -> Result<ValidationOutcome> {
        let started = Instant::now();

        let mut seen = HashSet::with_capacity(collection.len());
        let jobs: Vec<(String, String)> = collection
            .iter()
            .filter_map(|entry| {
                let fingerprint = self.fingerprinter.fingerprint(entry);
                seen.insert(fingerprint.clone())
                    .then(|| (fingerprint, entry.url.clone()))
            })
            .collect();

        let queue = Arc::new(WorkQueue {
            jobs,
            cursor: AtomicUsize::new(0),
            results: Arc::new(ValidationResults::new()),
            reach: Reachability::default(),
            failed_hosts: DashSet::new(),
            aborted: AtomicBool::new(false),
        });

        let pool_size = self.config.concurrency.max(1).min(queue.jobs.len().max(1));
        tracing::info!(entries = queue.jobs.len(), workers = pool_size, "Starting validation");

        let mut workers = JoinSet::new();
        for _ in 0..pool_size {
            let queue = queue.clone();
            let prober = self.prober.clone();
            let probe_timeout = self.config.probe_timeout;
            let threshold = self.config.fatal_failure_threshold;

            workers.spawn(async move {
                while let Some((fingerprint, url)) = queue.next_job() {
                    let report = match tokio::time::timeout(probe_timeout, prober.probe(url, &queue.reach)).await {
                        Ok(report) => report,
                        Err(_) => ProbeReport::new(Verdict::TimedOut, false),
                    };
                    queue.results.record(fingerprint, report.verdict);

                    if queue.note(url, &report, threshold) {
                        queue.aborted.store(true, Ordering::Relaxed);
                        return Err(PipelineError::Fatal(format!(
                            "{} hosts failed and none answered",
                            queue.failed_hosts.len()
                        )));
                    }
                }
                Ok(())
            });
        }

        let drained = match self.config.run_deadline {
            Some(deadline) => tokio::time::timeout(deadline, drain(&mut workers)).await.ok(),
            None => Some(drain(&mut workers).await),
        };

        // Stop in-flight probes and wait for them so no late verdict races the fill below
        workers.abort_all();
        while workers.join_next().await.is_some() {}

        match drained {
            Some(Err(e)) => {
                tracing::error!(error = %e, "Validation aborted");
                return Err(e);
            }
            Some(Ok(())) => {}
            None => tracing::warn!(
                deadline_ms = self.config.run_deadline.map(|d| d.as_millis() as u64),
                "Validation deadline reached"
            ),
        }

        let forced_unreachable = queue
            .jobs
            .iter()
            .filter(|(fingerprint, _)| queue.results.record(fingerprint, Verdict::Unreachable))
            .count();

        let counts = queue.results.counts();
        tracing::info!(
            playable = counts.playable,
            unreachable = counts.unreachable,
            timed_out = counts.timed_out,
            malformed = counts.malformed,
            forced_unreachable = forced_unreachable,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Validation complete"
        );

        Ok(ValidationOutcome {
            results: queue.results.clone(),
            forced_unreachable,
            elapsed: started.elapsed(),
        })
    }
}

async fn drain(workers: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => tracing::warn!(error = %e, "Probe worker panicked"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelEntry;
    use crate::services::prober::tests::{closed_port, spawn_stream_server};
    use crate::services::prober::HttpProber;
    use async_trait::async_trait;

    struct FixedProber(ProbeReport);

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, _url: &str, reach: &Reachability) -> ProbeReport {
            if self.0.reached_host {
                reach.mark();
            }
            self.0
        }
    }

    struct SleepyProber(Duration);

    #[async_trait]
    impl Prober for SleepyProber {
        async fn probe(&self, _url: &str, _reach: &Reachability) -> ProbeReport {
            tokio::time::sleep(self.0).await;
            ProbeReport::new(Verdict::Playable, true)
        }
    }

    fn numbered(count: usize) -> Collection {
        (0..count)
            .map(|i| ChannelEntry::new(format!("Channel {}", i), format!("http://host{}.test/{}.ts", i, i)))
            .collect()
    }

    fn config(concurrency: usize, probe_timeout: Duration) -> ValidatorConfig {
        ValidatorConfig {
            concurrency,
            probe_timeout,
            run_deadline: None,
            fatal_failure_threshold: 0,
        }
    }

    fn http_validator() -> Validator {
        let prober = HttpProber::new("VLC/3.0.20 LibVLC/3.0.20", Duration::from_secs(2), 5, 6).unwrap();
        Validator::new(
            Arc::new(prober),
            Fingerprinter::default(),
            config(4, Duration::from_secs(2)),
        )
    }

    #[tokio::test]
    async fn test_every_fingerprint_gets_one_verdict() {
        let addr = spawn_stream_server().await;
        let collection = Collection::new(vec![
            ChannelEntry::new("Live", format!("http://{}/live.ts", addr)),
            ChannelEntry::new("Live again", format!("http://{}/live.ts/", addr)),
            ChannelEntry::new("Master", format!("http://{}/master.m3u8", addr)),
            ChannelEntry::new("Missing", format!("http://{}/missing.ts", addr)),
            ChannelEntry::new("Rtmp", "rtmp://example.com/live"),
        ]);

        let outcome = http_validator().validate(&collection).await.unwrap();
        let fp = Fingerprinter::default();
        let verdict = |i: usize| outcome.results.get(&fp.fingerprint(&collection.entries[i]));

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.forced_unreachable, 0);
        assert_eq!(verdict(0), Some(Verdict::Playable));
        assert_eq!(verdict(1), Some(Verdict::Playable));
        assert_eq!(verdict(2), Some(Verdict::Playable));
        assert_eq!(verdict(3), Some(Verdict::Unreachable));
        assert_eq!(verdict(4), Some(Verdict::Malformed));
    }

    #[tokio::test]
    async fn test_unreachable_host_within_bounded_time() {
        let addr = closed_port().await;
        let collection = Collection::new(vec![ChannelEntry::new("Gone", format!("http://{}/live.ts", addr))]);

        let started = Instant::now();
        let outcome = http_validator().validate(&collection).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        let verdict = outcome.results.get(&Fingerprinter::default().fingerprint(&collection.entries[0]));
        assert!(matches!(verdict, Some(Verdict::Unreachable) | Some(Verdict::TimedOut)));
    }

    #[tokio::test]
    async fn test_slow_probe_times_out() {
        let validator = Validator::new(
            Arc::new(SleepyProber(Duration::from_secs(5))),
            Fingerprinter::default(),
            config(8, Duration::from_millis(100)),
        );
        let collection = numbered(3);

        let outcome = validator.validate(&collection).await.unwrap();
        assert_eq!(outcome.results.counts().timed_out, 3);
        assert!(outcome.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deadline_forces_unreachable() {
        let mut cfg = config(2, Duration::from_secs(30));
        cfg.run_deadline = Some(Duration::from_millis(200));
        let validator = Validator::new(
            Arc::new(SleepyProber(Duration::from_secs(10))),
            Fingerprinter::default(),
            cfg,
        );
        let collection = numbered(6);

        let outcome = validator.validate(&collection).await.unwrap();
        assert_eq!(outcome.results.len(), 6);
        assert_eq!(outcome.forced_unreachable, 6);
        assert_eq!(outcome.results.counts().unreachable, 6);
        assert!(outcome.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_network_aborts_run() {
        let mut cfg = config(1, Duration::from_secs(1));
        cfg.fatal_failure_threshold = 3;
        let validator = Validator::new(
            Arc::new(FixedProber(ProbeReport::new(Verdict::Unreachable, false))),
            Fingerprinter::default(),
            cfg,
        );

        let result = validator.validate(&numbered(20)).await;
        assert!(matches!(result, Err(PipelineError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_failures_with_reachable_hosts_do_not_abort() {
        let mut cfg = config(1, Duration::from_secs(1));
        cfg.fatal_failure_threshold = 3;
        let validator = Validator::new(
            Arc::new(FixedProber(ProbeReport::new(Verdict::Unreachable, true))),
            Fingerprinter::default(),
            cfg,
        );

        let outcome = validator.validate(&numbered(20)).await.unwrap();
        assert_eq!(outcome.results.counts().unreachable, 20);
        assert_eq!(outcome.forced_unreachable, 0);
    }

    #[tokio::test]
    async fn test_dead_source_does_not_abort_healthy_network() {
        let dead = closed_port().await;
        let live = spawn_stream_server().await;
        let mut entries: Vec<ChannelEntry> = (0..70)
            .map(|i| ChannelEntry::new(format!("Dead {}", i), format!("http://{}/ch{}.ts", dead, i)))
            .collect();
        entries.extend((0..3).map(|i| ChannelEntry::new(format!("Live {}", i), format!("http://{}/live.ts?id={}", live, i))));
        let collection = Collection::new(entries);

        let prober = HttpProber::new("VLC/3.0.20 LibVLC/3.0.20", Duration::from_secs(2), 5, 6).unwrap();
        let validator = Validator::new(Arc::new(prober), Fingerprinter::default(), ValidatorConfig::default());

        let outcome = validator.validate(&collection).await.unwrap();
        let counts = outcome.results.counts();
        assert_eq!(counts.unreachable, 70);
        assert_eq!(counts.playable, 3);
    }

    #[tokio::test]
    async fn test_timeouts_do_not_abort_run() {
        let mut cfg = config(4, Duration::from_millis(50));
        cfg.fatal_failure_threshold = 3;
        let validator = Validator::new(
            Arc::new(SleepyProber(Duration::from_secs(5))),
            Fingerprinter::default(),
            cfg,
        );

        let outcome = validator.validate(&numbered(8)).await.unwrap();
        assert_eq!(outcome.results.counts().timed_out, 8);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let validator = Validator::new(
            Arc::new(FixedProber(ProbeReport::new(Verdict::Playable, true))),
            Fingerprinter::default(),
            ValidatorConfig::default(),
        );
        let outcome = validator.validate(&Collection::default()).await.unwrap();
        assert!(outcome.results.is_empty());
    }
}
