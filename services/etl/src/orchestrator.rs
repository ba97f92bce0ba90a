//! Orchestrator: drives one run over a source file.
//!
//! State machine:
//! - `Idle → Initializing`: clear caches, validate the header, count rows,
//!   preload countries (and, when loading, the metric and its vocabulary)
//! - `Checking`: country coverage report, no writes
//! - `Loading`: chunked read → parse → resolve → assemble → load, one batch
//!   at a time in source order
//! - `Finished`: always reached; logs statistics whether the run completed,
//!   was stopped or failed
//!
//! A stop request is honoured at chunk and batch boundaries only. A batch that
//! has started is always carried to completion.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assembler::Assembler;
use crate::cache::EntityCaches;
use crate::config::Settings;
use crate::descriptor::SourceDescriptor;
use crate::error::{Error, Result};
use crate::loader::BulkLoader;
use crate::model::MetricRow;
use crate::parser::{ParsedChunk, RawRecord, RowParser};
use crate::reader::{count_rows, SourceReader};
use crate::report::{CoverageReport, ReportFiles};
use crate::resolver::{match_countries, EntityResolver};
use crate::stats::RunStats;
use crate::storage::Storage;

const PROGRESS_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Check,
    Load,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Check => "check",
            RunMode::Load => "load",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Initializing,
    Checking,
    Loading,
    Finished,
}

/// Result of a completed or stopped run.
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: RunStats,
    /// Present in check mode.
    pub report: Option<(CoverageReport, ReportFiles)>,
}

pub struct Orchestrator<S> {
    descriptor: Arc<SourceDescriptor>,
    storage: Arc<S>,
    caches: Arc<EntityCaches>,
    settings: Settings,
    source_path: PathBuf,
    cancel: CancellationToken,
    state: RunState,
    run_id: Uuid,
}

impl<S: Storage + 'static> Orchestrator<S> {
    pub fn new(descriptor: SourceDescriptor, storage: Arc<S>, settings: Settings) -> Self {
        let caches = Arc::new(EntityCaches::new(&descriptor.cache));
        let source_path = descriptor.source.path.clone();
        Self {
            descriptor: Arc::new(descriptor),
            storage,
            caches,
            settings,
            source_path,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
            run_id: Uuid::new_v4(),
        }
    }

    /// Read from `path` instead of the descriptor's source path.
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Share caches with other orchestrators.
    pub fn with_caches(mut self, caches: Arc<EntityCaches>) -> Self {
        self.caches = caches;
        self
    }

    pub fn caches(&self) -> &Arc<EntityCaches> {
        &self.caches
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the run to stop at the next chunk or batch boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this run when cancelled, for use from other tasks.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&mut self, mode: RunMode) -> Result<RunOutcome> {
        let mut stats = RunStats::new(self.run_id, mode.as_str());
        info!(
            run_id = %self.run_id,
            mode = mode.as_str(),
            source = %self.source_path.display(),
            descriptor = %self.descriptor.name,
            "run started"
        );

        let result = self.execute(mode, &mut stats).await;

        self.state = RunState::Finished;
        stats.finish(self.caches.stats().await);
        stats.log();
        if let Err(e) = &result {
            warn!(run_id = %self.run_id, error = %e, "run failed");
        }
        result.map(|report| RunOutcome { stats, report })
    }

    async fn execute(
        &mut self,
        mode: RunMode,
        stats: &mut RunStats,
    ) -> Result<Option<(CoverageReport, ReportFiles)>> {
        self.state = RunState::Initializing;
        let reader = self.initialize(mode, stats).await?;

        match mode {
            RunMode::Check => {
                self.state = RunState::Checking;
                self.check(reader, stats).await.map(Some)
            }
            RunMode::Load => {
                self.state = RunState::Loading;
                self.load(reader, stats).await.map(|_| None)
            }
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    async fn initialize(&self, mode: RunMode, stats: &mut RunStats) -> Result<SourceReader> {
        let d = &self.descriptor;
        self.caches.clear_all().await;

        let encoding = d.encoding()?;
        let reader = SourceReader::open(&self.source_path, d.delimiter(), encoding)?;
        reader.require_columns(d.required_columns())?;

        let path = self.source_path.clone();
        let delimiter = d.delimiter();
        stats.total_rows =
            tokio::task::spawn_blocking(move || count_rows(&path, delimiter, encoding)).await??;
        info!(total_rows = stats.total_rows, "source opened");

        self.caches
            .preload_countries(self.storage.as_ref(), d.country_lookup)
            .await?;

        if mode == RunMode::Load {
            let metric = self.storage.get_or_create_metric(&d.metric).await?;
            info!(metric_id = metric.id, slug = %metric.slug, "metric ready");
            self.caches.metrics.set(metric.slug.clone(), metric.clone()).await;
            self.preload_for_metric(metric.id).await?;
        }
        Ok(reader)
    }

    async fn preload_for_metric(&self, metric_id: i32) -> Result<()> {
        let storage = self.storage.as_ref();
        self.caches.preload_attributes(storage).await?;
        self.caches.preload_series(storage, metric_id).await?;
        self.caches.preload_periods(storage).await?;
        Ok(())
    }

    async fn metric(&self) -> Result<MetricRow> {
        self.caches
            .metrics
            .get(&self.descriptor.metric.slug)
            .await
            .ok_or(Error::MetricNotInitialized)
    }

    // =========================================================================
    // Check mode
    // =========================================================================

    async fn check(
        &self,
        mut reader: SourceReader,
        stats: &mut RunStats,
    ) -> Result<(CoverageReport, ReportFiles)> {
        let d = &self.descriptor;
        let mut names: BTreeSet<String> = BTreeSet::new();

        loop {
            if self.cancel.is_cancelled() {
                info!("stop requested, country scan cut short");
                stats.stopped = true;
                break;
            }
            let column = d.country_column.clone();
            let chunk_size = d.chunk_size;
            let (returned, scanned) = tokio::task::spawn_blocking(move || {
                let scanned = reader.next_chunk(chunk_size)?.map(|rows| {
                    let values: BTreeSet<String> = rows
                        .iter()
                        .filter_map(|r| r.get(&column))
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                        .collect();
                    (rows.len(), values)
                });
                Ok::<_, Error>((reader, scanned))
            })
            .await??;
            reader = returned;

            let Some((rows, values)) = scanned else {
                break;
            };
            stats.rows_read += rows as u64;
            names.extend(values);
        }

        let matches = match_countries(
            self.storage.as_ref(),
            &self.caches,
            d.country_lookup,
            &d.country_alias_map,
            &names,
        )
        .await?;
        let countries = self.storage.list_countries(d.country_lookup).await?;
        let report = CoverageReport::build(&matches, &countries);
        report.log();

        let files = report.write(&self.settings.report_dir).await?;
        info!(
            missing = %files.missing.display(),
            unused = %files.unused.display(),
            "coverage report written"
        );
        Ok((report, files))
    }

    // =========================================================================
    // Load mode
    // =========================================================================

    async fn next_parsed(
        &self,
        reader: SourceReader,
        parser: Arc<RowParser>,
    ) -> Result<(SourceReader, Option<ParsedChunk>)> {
        let chunk_size = self.descriptor.chunk_size;
        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let parsed = match reader.next_chunk(chunk_size)? {
                Some(rows) => Some(parser.parse_chunk(&rows)?),
                None => None,
            };
            Ok::<_, Error>((reader, parsed))
        })
        .await?
    }

    async fn load(&self, reader: SourceReader, stats: &mut RunStats) -> Result<()> {
        let d = &self.descriptor;
        let metric = self.metric().await?;
        let parser = Arc::new(RowParser::new(d.clone()));
        let resolver = EntityResolver::new(self.storage.clone(), self.caches.clone(), d, metric.id);
        let assembler = Assembler::new(d, metric.data_kind);
        let loader = BulkLoader::new(self.storage.clone(), d.skip_duplicates);

        let mut reader = reader;
        let mut buffer: Vec<RawRecord> = Vec::new();

        'chunks: loop {
            if self.cancel.is_cancelled() {
                break 'chunks;
            }
            let (returned, parsed) = self.next_parsed(reader, parser.clone()).await?;
            reader = returned;
            let Some(chunk) = parsed else {
                break 'chunks;
            };
            stats.record_chunk(&chunk);
            buffer.extend(chunk.records);

            while buffer.len() >= d.batch_size {
                if self.cancel.is_cancelled() {
                    break 'chunks;
                }
                let batch: Vec<RawRecord> = buffer.drain(..d.batch_size).collect();
                self.process_batch(&batch, &resolver, &assembler, &loader, stats)
                    .await?;
            }
        }

        if self.cancel.is_cancelled() {
            stats.stopped = true;
            info!(
                batches = stats.batches,
                unflushed = buffer.len(),
                "stop requested, leaving at batch boundary"
            );
            return Ok(());
        }
        if !buffer.is_empty() {
            self.process_batch(&buffer, &resolver, &assembler, &loader, stats)
                .await?;
        }
        Ok(())
    }

    /// Resolve, assemble and load one batch, retrying transient storage
    /// failures with invalidated caches.
    async fn process_batch(
        &self,
        batch: &[RawRecord],
        resolver: &EntityResolver<S>,
        assembler: &Assembler,
        loader: &BulkLoader<S>,
        stats: &mut RunStats,
    ) -> Result<()> {
        let policy = &self.settings.retry;
        let mut attempt = 1;

        loop {
            let result = async {
                let resolved = resolver.resolve_batch(batch).await?;
                let assembly = assembler.assemble(batch, &resolved)?;
                let outcome = loader.load(&assembly.facts).await?;
                Ok::<_, Error>((resolved, assembly, outcome))
            }
            .await;

            match result {
                Ok((resolved, assembly, outcome)) => {
                    stats.record_batch(&assembly, &outcome, &resolved.skipped_countries);
                    if stats.batches % PROGRESS_EVERY == 0 {
                        info!(
                            batches = stats.batches,
                            rows_read = stats.rows_read,
                            total_rows = stats.total_rows,
                            progress = %format!("{:.1}%", stats.progress()),
                            inserted = stats.facts_inserted,
                            duplicates = stats.duplicates,
                            "progress"
                        );
                    }
                    return Ok(());
                }
                Err(Error::Storage(e)) if e.is_transient() && policy.allows_retry(attempt) => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient storage failure, retrying batch"
                    );
                    stats.retries += 1;
                    self.invalidate_caches(resolver.metric_id(), stats).await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop cached ids that may belong to rolled-back writes, then reload.
    async fn invalidate_caches(&self, metric_id: i32, stats: &mut RunStats) {
        stats.cache_invalidations += 1;
        let metric = self.caches.metrics.get(&self.descriptor.metric.slug).await;
        self.caches.clear_all().await;
        if let Some(metric) = metric {
            self.caches.metrics.set(metric.slug.clone(), metric).await;
        }

        // a failed reload only costs cache hits
        let reloaded = async {
            self.caches
                .preload_countries(self.storage.as_ref(), self.descriptor.country_lookup)
                .await?;
            self.preload_for_metric(metric_id).await
        }
        .await;
        if let Err(e) = reloaded {
            warn!(error = %e, "cache reload failed, continuing with cold caches");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests_support::descriptor_json;
    use crate::model::FactValue;
    use crate::retry::RetryPolicy;
    use crate::storage::memory::MemoryStorage;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    struct TempCsv(PathBuf);

    impl TempCsv {
        fn new(content: &str) -> Self {
            let path = std::env::temp_dir().join(format!("etl-run-{}.csv", Uuid::new_v4()));
            std::fs::write(&path, content).unwrap();
            TempCsv(path)
        }
    }

    impl Drop for TempCsv {
        fn drop(&mut self) {
            std::fs::remove_file(&self.0).ok();
        }
    }

    fn settings() -> Settings {
        Settings {
            report_dir: std::env::temp_dir().join(format!("etl-reports-{}", Uuid::new_v4())),
            retry: RetryPolicy::immediate(3),
            ..Default::default()
        }
    }

    fn orchestrator(
        store: &Arc<MemoryStorage>,
        csv: &TempCsv,
        extra: &str,
    ) -> Orchestrator<MemoryStorage> {
        let descriptor = SourceDescriptor::from_json(&descriptor_json(extra)).unwrap();
        Orchestrator::new(descriptor, store.clone(), settings()).with_source_path(&csv.0)
    }

    fn rows(count: usize) -> String {
        let mut text = String::from("country,value,sex,year\n");
        for i in 0..count {
            text.push_str(&format!("Chile,{},Male,{}\n", i, 2000 + i));
        }
        text
    }

    // -------------------------------------------------------------------------
    // Load mode
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_korea_row_loads_one_fact() {
        let store = Arc::new(MemoryStorage::new());
        let south_korea = store.add_country("South Korea");
        let csv = TempCsv::new("country,value,sex,year\nKorea,12.5,Male,2021\n");

        let mut run = orchestrator(&store, &csv, r#""country_alias_map": {"Korea": ["South Korea"]}"#);
        let outcome = run.run(RunMode::Load).await.unwrap();
        assert_eq!(run.state(), RunState::Finished);
        assert_eq!(outcome.stats.facts_inserted, 1);

        let facts = store.facts();
        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.country_id, south_korea);
        assert_eq!(fact.city_id, None);
        assert_eq!(fact.value, FactValue::Numeric(Decimal::from_str("12.5").unwrap()));
        assert_eq!(fact.value.columns().populated(), 1);

        let links = store.series_links(fact.series_id);
        assert_eq!(links.len(), 1);
        assert_eq!(store.attribute_type_count(), 1);
        assert_eq!(store.period_count(), 1);
    }

    #[tokio::test]
    async fn test_second_load_inserts_nothing() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let csv = TempCsv::new(&rows(25));
        let extra = r#""batch_size": 10, "chunk_size": 7"#;

        let first = orchestrator(&store, &csv, extra).run(RunMode::Load).await.unwrap();
        assert_eq!(first.stats.facts_inserted, 25);
        assert_eq!(first.stats.batches, 3);

        let second = orchestrator(&store, &csv, extra).run(RunMode::Load).await.unwrap();
        assert_eq!(second.stats.facts_inserted, 0);
        assert_eq!(second.stats.duplicates, 25);
        assert_eq!(store.fact_count(), 25);
    }

    #[tokio::test]
    async fn test_alias_fan_out_produces_two_facts() {
        let store = Arc::new(MemoryStorage::new());
        let czechia = store.add_country("Czechia");
        let slovakia = store.add_country("Slovakia");
        let csv = TempCsv::new("country,value,sex,year\nCzechoslovakia,3,Total,1990\n");

        let mut run = orchestrator(
            &store,
            &csv,
            r#""country_alias_map": {"Czechoslovakia": ["Czechia", "Slovakia"]}"#,
        );
        run.run(RunMode::Load).await.unwrap();

        let mut countries: Vec<i32> = store.facts().iter().map(|f| f.country_id).collect();
        countries.sort_unstable();
        assert_eq!(countries, vec![czechia, slovakia]);
    }

    #[tokio::test]
    async fn test_cold_cache_run_reaches_same_ids() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let csv = TempCsv::new(&rows(6));
        let caches = Arc::new(EntityCaches::new(&Default::default()));

        let mut first = orchestrator(&store, &csv, "").with_caches(caches.clone());
        first.run(RunMode::Load).await.unwrap();
        let facts_before = store.facts();

        let mut second = orchestrator(&store, &csv, "").with_caches(caches.clone());
        let outcome = second.run(RunMode::Load).await.unwrap();

        assert_eq!(outcome.stats.duplicates, 6);
        assert_eq!(store.facts(), facts_before);
        assert_eq!(store.series_count(), 1);
        assert_eq!(store.period_count(), 6);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        store.fail_next("insert_facts", 2);
        let csv = TempCsv::new(&rows(3));

        let outcome = orchestrator(&store, &csv, "").run(RunMode::Load).await.unwrap();
        assert_eq!(outcome.stats.facts_inserted, 3);
        assert_eq!(outcome.stats.retries, 2);
        assert_eq!(outcome.stats.cache_invalidations, 2);
        assert_eq!(store.call_count("insert_facts"), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        store.fail_next("insert_facts", 10);
        let csv = TempCsv::new(&rows(3));

        let mut run = orchestrator(&store, &csv, "");
        let err = run.run(RunMode::Load).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(run.state(), RunState::Finished);
        assert_eq!(store.call_count("insert_facts"), 3);
    }

    // -------------------------------------------------------------------------
    // Stop
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stop_before_start_loads_nothing() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let csv = TempCsv::new(&rows(5));

        let mut run = orchestrator(&store, &csv, "");
        run.stop();
        let outcome = run.run(RunMode::Load).await.unwrap();
        assert!(outcome.stats.stopped);
        assert_eq!(outcome.stats.batches, 0);
        assert_eq!(store.fact_count(), 0);
        assert_eq!(run.state(), RunState::Finished);
    }

    #[tokio::test]
    async fn test_stop_during_batch_completes_that_batch() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let csv = TempCsv::new(&rows(30));

        let mut run = orchestrator(&store, &csv, r#""batch_size": 10"#);
        let stop = run.stop_handle();
        store.on_insert(move |_| stop.cancel());

        let outcome = run.run(RunMode::Load).await.unwrap();
        assert!(outcome.stats.stopped);
        assert_eq!(outcome.stats.batches, 1);
        assert_eq!(store.fact_count(), 10);
    }

    // -------------------------------------------------------------------------
    // Check mode and fatal errors
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_check_mode_writes_report() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("South Korea");
        store.add_country("Chile");
        let argentina = store.add_country("Argentina");
        let csv = TempCsv::new(
            "country,value,sex,year\nKorea,1,Male,2021\nChile,2,Male,2021\nAtlantis,3,Male,2021\n",
        );

        let mut run = orchestrator(&store, &csv, r#""country_alias_map": {"Korea": ["South Korea"]}"#);
        let outcome = run.run(RunMode::Check).await.unwrap();
        let (report, files) = outcome.report.unwrap();

        assert!(report.found.contains("Chile"));
        assert!(report.via_alias.contains_key("Korea"));
        assert_eq!(std::fs::read_to_string(&files.missing).unwrap(), "Atlantis\n");
        assert_eq!(
            std::fs::read_to_string(&files.unused).unwrap(),
            format!("Argentina ({})\n", argentina)
        );
        assert_eq!(store.call_count("get_or_create_metric"), 0);
        assert_eq!(store.fact_count(), 0);

        if let Some(dir) = files.missing.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[tokio::test]
    async fn test_missing_column_is_fatal() {
        let store = Arc::new(MemoryStorage::new());
        let csv = TempCsv::new("country,value,year\nChile,1,2021\n");

        let err = orchestrator(&store, &csv, "").run(RunMode::Load).await.unwrap_err();
        assert!(matches!(err, Error::MissingColumns(cols) if cols == vec!["sex".to_string()]));
    }

    #[tokio::test]
    async fn test_unknown_country_aborts_load() {
        let store = Arc::new(MemoryStorage::new());
        let csv = TempCsv::new("country,value,sex,year\nAtlantis,1,Male,2021\n");

        let err = orchestrator(&store, &csv, "").run(RunMode::Load).await.unwrap_err();
        assert!(matches!(err, Error::CountryNotFound(_)));
        assert_eq!(store.fact_count(), 0);
    }

    #[tokio::test]
    async fn test_strict_mode_stops_on_invalid_row() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let csv = TempCsv::new("country,value,sex,year\nChile,1,Male,20x1\n");

        let err = orchestrator(&store, &csv, r#""skip_invalid_rows": false"#)
            .run(RunMode::Load)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRow { line: 2, .. }));
    }
}
