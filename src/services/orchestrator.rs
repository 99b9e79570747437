//! Pipeline run: Scraping → Deduplicating → Validating → Merging → Publishing → Done
//!
//! Any fatal error moves the run to `Failed` and leaves published playlists
//! untouched. Per-source and per-entry failures are recorded, never fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::{RunState, RunSummary, SourceCollection, SourceReport, TierReport};
use crate::services::dedup::{deduplicate, ConflictStrategy};
use crate::services::fingerprint::Fingerprinter;
use crate::services::m3u_parser::write_playlist;
use crate::services::merger::Merger;
use crate::services::metrics::MetricsObserver;
use crate::services::prober::HttpProber;
use crate::services::publisher::{write_atomic, Publisher};
use crate::services::sources::{Blacklist, Fetcher, SourceCatalog};
use crate::services::staging::WorkDir;
use crate::services::validator::{Validator, ValidatorConfig};

pub const SUMMARY_FILE: &str = "run-summary.json";

/// Receives every state transition of a run
pub trait StageObserver: Send + Sync {
    /// Called before the run enters `to`; an error fails the run
    fn on_transition(&self, from: Option<RunState>, to: RunState, summary: &RunSummary) -> Result<()>;

    /// Called once the run reached `Done` or `Failed`
    fn on_finish(&self, _summary: &RunSummary) {}
}

/// Tracks the current state and how long each stage took
struct StageClock {
    current: Option<RunState>,
    entered: Instant,
}

impl StageClock {
    fn new() -> Self {
        Self {
            current: None,
            entered: Instant::now(),
        }
    }

    fn close(&mut self, summary: &mut RunSummary) {
        if let Some(stage) = self.current {
            summary
                .stage_millis
                .insert(stage.as_str().to_string(), self.entered.elapsed().as_millis() as u64);
        }
    }
}

pub struct Orchestrator {
    catalog: SourceCatalog,
    blacklist: Blacklist,
    fingerprinter: Fingerprinter,
    strategy: ConflictStrategy,
    validator: Validator,
    merger: Merger,
    work_dir: WorkDir,
    publisher: Publisher,
    observers: Vec<Arc<dyn StageObserver>>,
    run_lock: Mutex<()>,
    latest: RwLock<Option<RunSummary>>,
}

impl Orchestrator {
    pub fn new(
        catalog: SourceCatalog,
        validator: Validator,
        merger: Merger,
        work_dir: WorkDir,
        publisher: Publisher,
    ) -> Self {
        Self {
            catalog,
            blacklist: Blacklist::default(),
            fingerprinter: Fingerprinter::default(),
            strategy: ConflictStrategy::default(),
            validator,
            merger,
            work_dir,
            publisher,
            observers: Vec::new(),
            run_lock: Mutex::new(()),
            latest: RwLock::new(None),
        }
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_dedup(mut self, fingerprinter: Fingerprinter, strategy: ConflictStrategy) -> Self {
        self.fingerprinter = fingerprinter;
        self.strategy = strategy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Wire every stage from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let fetcher = Arc::new(
            Fetcher::new(
                &config.user_agent,
                Duration::from_millis(config.fetch_timeout_ms),
                config.max_retries,
                config.max_m3u_size_mb,
            )
            .map_err(|e| PipelineError::Fatal(format!("failed to create HTTP client: {}", e)))?,
        );

        let catalog = match config.sources_manifest {
            Some(ref manifest) => SourceCatalog::from_manifest(Path::new(manifest), fetcher).await?,
            None => SourceCatalog::from_input_path(Path::new(&config.input_path)).await?,
        };
        tracing::info!("Source catalog loaded: {} sources", catalog.len());

        let blacklist = match config.blacklist_file {
            Some(ref path) => Blacklist::load(Path::new(path)).await?,
            None => Blacklist::default(),
        };

        let probe_timeout = Duration::from_millis(config.probe_timeout_ms);
        let prober = HttpProber::new(
            &config.user_agent,
            probe_timeout,
            config.segments_to_check,
            config.max_playlist_depth,
        )
        .map_err(|e| PipelineError::Fatal(format!("failed to create HTTP client: {}", e)))?;

        let fingerprinter = Fingerprinter::new(config.fingerprint_with_name);
        let strategy = config.conflict_strategy();

        let validator = Validator::new(
            Arc::new(prober),
            fingerprinter,
            ValidatorConfig {
                concurrency: config.probe_concurrency,
                probe_timeout,
                run_deadline: (config.run_deadline_ms > 0).then(|| Duration::from_millis(config.run_deadline_ms)),
                fatal_failure_threshold: config.fatal_failure_threshold,
            },
        );
        let merger = Merger::new(fingerprinter, strategy, config.tier_policies());

        Ok(Self::new(
            catalog,
            validator,
            merger,
            WorkDir::new(&config.work_dir),
            Publisher::new(&config.publish_dir),
        )
        .with_blacklist(blacklist)
        .with_dedup(fingerprinter, strategy)
        .with_observer(Arc::new(MetricsObserver)))
    }

    pub fn publish_dir(&self) -> &Path {
        self.publisher.publish_dir()
    }

    pub fn summary_path(&self) -> PathBuf {
        self.publisher.path_of(SUMMARY_FILE)
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Summary of the last finished run, in memory or from disk
    pub async fn latest(&self) -> Option<RunSummary> {
        if let Some(summary) = self.latest.read().await.clone() {
            return Some(summary);
        }
        let bytes = tokio::fs::read(self.summary_path()).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Execute one full run; runs never overlap
    pub async fn run(&self) -> RunSummary {
        let _guard = self.run_lock.lock().await;

        let mut summary = RunSummary::new(uuid::Uuid::new_v4().to_string());
        let mut clock = StageClock::new();
        tracing::info!(run_id = %summary.run_id, "Pipeline run started");

        match self.execute(&mut summary, &mut clock).await {
            Ok(()) => {
                clock.close(&mut summary);
                summary.state = RunState::Done;
                if let Err(e) = self.work_dir.clear().await {
                    tracing::warn!(error = %e, "Failed to clear working storage");
                }
                tracing::info!(
                    run_id = %summary.run_id,
                    published = summary.published(),
                    duplicates_removed = summary.duplicates_removed,
                    "Pipeline run done"
                );
            }
            Err(e) => {
                clock.close(&mut summary);
                tracing::error!(
                    run_id = %summary.run_id,
                    stage = %summary.state,
                    error = %e,
                    "Pipeline run failed"
                );
                summary.state = RunState::Failed;
                summary.error = Some(e.to_string());
            }
        }
        summary.finished_at = Some(chrono::Utc::now().timestamp_millis());

        for observer in &self.observers {
            observer.on_finish(&summary);
        }

        match serde_json::to_vec_pretty(&summary) {
            Ok(bytes) => {
                let written = match tokio::fs::create_dir_all(self.publish_dir()).await {
                    Ok(()) => write_atomic(&self.summary_path(), &bytes).await,
                    Err(e) => Err(PipelineError::storage(self.publish_dir(), e)),
                };
                if let Err(e) = written {
                    tracing::warn!(error = %e, "Failed to write run summary");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode run summary"),
        }

        *self.latest.write().await = Some(summary.clone());
        summary
    }

    /// Move to the stage after the current one; observers may veto
    fn advance(&self, summary: &mut RunSummary, clock: &mut StageClock) -> Result<()> {
        let to = match clock.current {
            None => RunState::Scraping,
            Some(stage) => stage
                .next()
                .filter(|next| !next.is_terminal())
                .ok_or_else(|| PipelineError::Fatal(format!("no stage follows {}", stage)))?,
        };

        clock.close(summary);
        for observer in &self.observers {
            observer.on_transition(clock.current, to, summary)?;
        }
        clock.current = Some(to);
        clock.entered = Instant::now();
        summary.state = to;
        tracing::info!(run_id = %summary.run_id, stage = %to, "Entering stage");
        Ok(())
    }

    async fn execute(&self, summary: &mut RunSummary, clock: &mut StageClock) -> Result<()> {
        // Scraping
        self.advance(summary, clock)?;
        self.work_dir.reset().await?;
        let sources = self.scrape(summary).await?;

        // Deduplicating
        self.advance(summary, clock)?;
        let deduped = deduplicate(
            sources.iter().map(|s| &s.collection),
            &self.fingerprinter,
            self.strategy,
        );
        summary.duplicates_removed = deduped.removed;
        summary.deduplicated = deduped.collection.len();
        self.work_dir.write_deduped(&deduped.collection).await?;

        // Validating
        self.advance(summary, clock)?;
        let outcome = self.validator.validate(&deduped.collection).await?;
        summary.verdicts = outcome.results.counts();
        summary.forced_unreachable = outcome.forced_unreachable;
        self.work_dir.write_verdicts(&outcome.results).await?;

        // Merging
        self.advance(summary, clock)?;
        let tiers = self.merger.merge(&sources, &outcome.results);

        // Publishing
        self.advance(summary, clock)?;
        let files: Vec<(String, Vec<u8>)> = tiers
            .iter()
            .map(|tier| (tier.policy.file.clone(), write_playlist(&tier.collection).into_bytes()))
            .collect();
        self.publisher.publish(&files).await?;

        summary.tiers = tiers
            .iter()
            .map(|tier| TierReport {
                tier: tier.policy.name.clone(),
                file: tier.policy.file.clone(),
                entries: tier.collection.len(),
            })
            .collect();

        Ok(())
    }

    /// Produce every source concurrently; failures count as zero entries
    async fn scrape(&self, summary: &mut RunSummary) -> Result<Vec<SourceCollection>> {
        let produced =
            futures::future::join_all(self.catalog.sources().iter().map(|source| source.produce())).await;

        let mut collections = Vec::with_capacity(produced.len());
        for (index, (source, result)) in self.catalog.sources().iter().zip(produced).enumerate() {
            let mut report = SourceReport {
                name: source.name().to_string(),
                entries: 0,
                malformed_lines: 0,
                quarantined: 0,
                blacklisted: 0,
                error: None,
            };

            match result {
                Ok(parsed) => {
                    let mut collection = parsed.collection;
                    report.blacklisted = self.blacklist.apply(&mut collection);
                    report.entries = collection.len();
                    report.malformed_lines = parsed.malformed;
                    report.quarantined = parsed.quarantined;

                    self.work_dir.write_raw(index, source.name(), &collection).await?;
                    tracing::info!(
                        source = %source.name(),
                        entries = report.entries,
                        malformed = report.malformed_lines,
                        quarantined = report.quarantined,
                        blacklisted = report.blacklisted,
                        "Source scraped"
                    );

                    collections.push(SourceCollection {
                        source: source.name().to_string(),
                        trust: source.trust(),
                        collection,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(source = %source.name(), error = %e, "Source skipped");
                    report.error = Some(e.to_string());
                }
            }

            summary.sources.push(report);
        }

        summary.scraped = collections.iter().map(|c| c.collection.len()).sum();

        // Publishing nothing would wipe good playlists
        if !self.catalog.is_empty() && collections.is_empty() {
            return Err(PipelineError::Fatal("every source failed".to_string()));
        }

        Ok(collections)
    }
}
