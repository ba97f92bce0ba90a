//! Run statistics.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::assembler::Assembly;
use crate::cache::NamedStats;
use crate::loader::LoadOutcome;
use crate::parser::ParsedChunk;

#[derive(Debug, Clone)]
pub struct RunStats {
    pub run_id: Uuid,
    pub mode: &'static str,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stopped: bool,

    pub total_rows: u64,
    pub rows_read: u64,
    pub rows_parsed: u64,
    pub rows_dropped: u64,
    pub rows_invalid: u64,
    pub attribute_errors: u64,
    pub period_conflicts: u64,

    pub facts_assembled: u64,
    pub facts_inserted: u64,
    pub duplicates: u64,
    pub records_skipped: u64,
    pub records_dropped: u64,
    pub unresolved_cities: u64,
    pub skipped_countries: BTreeSet<String>,

    pub batches: u64,
    pub retries: u64,
    pub cache_invalidations: u64,
    pub caches: Vec<NamedStats>,
}

impl RunStats {
    pub fn new(run_id: Uuid, mode: &'static str) -> Self {
        Self {
            run_id,
            mode,
            started_at: Utc::now(),
            finished_at: None,
            stopped: false,
            total_rows: 0,
            rows_read: 0,
            rows_parsed: 0,
            rows_dropped: 0,
            rows_invalid: 0,
            attribute_errors: 0,
            period_conflicts: 0,
            facts_assembled: 0,
            facts_inserted: 0,
            duplicates: 0,
            records_skipped: 0,
            records_dropped: 0,
            unresolved_cities: 0,
            skipped_countries: BTreeSet::new(),
            batches: 0,
            retries: 0,
            cache_invalidations: 0,
            caches: Vec::new(),
        }
    }

    pub fn record_chunk(&mut self, chunk: &ParsedChunk) {
        self.rows_read += chunk.rows as u64;
        self.rows_parsed += chunk.records.len() as u64;
        self.rows_dropped += chunk.dropped as u64;
        self.rows_invalid += chunk.invalid as u64;
        self.attribute_errors += chunk.tally.attribute_errors as u64;
        self.period_conflicts += chunk.tally.period_conflicts as u64;
    }

    pub fn record_batch(
        &mut self,
        assembly: &Assembly,
        outcome: &LoadOutcome,
        skipped_countries: &BTreeSet<String>,
    ) {
        self.batches += 1;
        self.facts_assembled += assembly.facts.len() as u64;
        self.records_skipped += assembly.skipped as u64;
        self.records_dropped += assembly.dropped as u64;
        self.unresolved_cities += assembly.unresolved_cities as u64;
        self.facts_inserted += outcome.inserted;
        self.duplicates += outcome.duplicates;
        self.skipped_countries.extend(skipped_countries.iter().cloned());
    }

    pub fn finish(&mut self, caches: Vec<NamedStats>) {
        self.finished_at = Some(Utc::now());
        self.caches = caches;
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    pub fn rows_per_sec(&self) -> f64 {
        let secs = self.elapsed().num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            0.0
        } else {
            self.rows_read as f64 / secs
        }
    }

    /// Percent of the input read so far.
    pub fn progress(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.rows_read as f64 * 100.0 / self.total_rows as f64
        }
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            mode = self.mode,
            stopped = self.stopped,
            elapsed_ms = self.elapsed().num_milliseconds(),
            rows_per_sec = %format!("{:.1}", self.rows_per_sec()),
            "run finished"
        );
        info!(
            total = self.total_rows,
            read = self.rows_read,
            parsed = self.rows_parsed,
            dropped = self.rows_dropped,
            invalid = self.rows_invalid,
            attribute_errors = self.attribute_errors,
            period_conflicts = self.period_conflicts,
            "rows"
        );
        info!(
            assembled = self.facts_assembled,
            inserted = self.facts_inserted,
            duplicates = self.duplicates,
            skipped = self.records_skipped,
            dropped = self.records_dropped,
            unresolved_cities = self.unresolved_cities,
            skipped_countries = self.skipped_countries.len(),
            batches = self.batches,
            retries = self.retries,
            cache_invalidations = self.cache_invalidations,
            "facts"
        );
        for cache in &self.caches {
            info!(
                cache = cache.name,
                hit_rate = %format!("{:.1}%", cache.stats.hit_rate()),
                size = cache.stats.size,
                capacity = cache.stats.capacity,
                fullness = %format!("{:.1}%", cache.stats.fullness()),
                evictions = cache.stats.evictions,
                "cache"
            );
        }
    }
}
