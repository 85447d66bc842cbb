//! Migration driver: sections, their sources and their sinks.

use crate::config::{Config, ErrorPolicy, SinkOptions, STATIC_SOURCE};
use crate::error::{MigrateError, Result};
use crate::mapping::MappingSet;
use crate::source::{SourceLocator, SourceSpec};
use crate::target::{build_sink, Sink, SinkStats, TargetConnection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed`, `completed_with_errors` when sources failed under
    /// the continue policy, or `aborted`.
    pub status: String,

    /// Why the run stopped, when it was aborted.
    pub error: Option<String>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Data rows read from every source.
    pub rows_read: u64,

    /// Rows written (committed, in batched mode).
    pub rows_written: u64,

    /// Rows skipped for having the wrong width.
    pub rows_skipped: u64,

    /// Rows whose insert or batch failed.
    pub rows_failed: u64,

    pub sections: Vec<SectionReport>,

    /// Sources that failed and were skipped.
    pub failed_sources: Vec<String>,
}

impl MigrationReport {
    fn new(
        run_id: String,
        started_at: DateTime<Utc>,
        sections: Vec<SectionReport>,
        error: Option<&MigrateError>,
    ) -> Self {
        let completed_at = Utc::now();
        let failed_sources: Vec<String> = sections
            .iter()
            .flat_map(|s| s.failures.iter().map(|f| f.source.clone()))
            .collect();
        let status = if error.is_some() {
            "aborted"
        } else if failed_sources.is_empty() {
            "completed"
        } else {
            "completed_with_errors"
        };
        let sum = |f: fn(&SectionReport) -> u64| sections.iter().map(f).sum::<u64>();

        Self {
            run_id,
            status: status.to_string(),
            error: error.map(|e| e.to_string()),
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            started_at,
            completed_at,
            rows_read: sum(|s| s.sources.iter().map(|r| r.rows_read).sum()),
            rows_skipped: sum(|s| s.sources.iter().map(|r| r.rows_skipped).sum()),
            rows_written: sum(|s| s.stats.rows_written),
            rows_failed: sum(|s| s.stats.rows_failed),
            sections,
            failed_sources,
        }
    }
}

/// Outcome of one section.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub name: String,
    pub target: String,
    pub sources: Vec<SourceReport>,
    pub stats: SinkStats,
    pub failures: Vec<SourceFailure>,
}

/// Counts for one source. Written and failed rows are those the sink
/// reported while this source was being read, so in batched mode they
/// include earlier sources' rows committed by the same batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
}

impl SourceReport {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn record_sink(&mut self, before: SinkStats, after: SinkStats) {
        self.rows_written = after.rows_written - before.rows_written;
        self.rows_failed = after.rows_failed - before.rows_failed;
    }
}

/// A source that failed under the continue policy.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

/// A section with its mappings parsed.
#[derive(Debug)]
struct SectionPlan {
    name: String,
    target: String,
    spec: SourceSpec,
    mappings: MappingSet,
}

/// Runs the configured sections against one target connection.
#[derive(Debug)]
pub struct Migrator {
    options: SinkOptions,
    plans: Vec<SectionPlan>,
}

impl Migrator {
    /// Prepare every section of `config`.
    ///
    /// All mappings are parsed here, so a bad expression fails before any
    /// row is written.
    pub fn new(config: &Config, options: SinkOptions) -> Result<Self> {
        Self::for_sections(config, options, &[])
    }

    /// Prepare the named sections only, in configuration order. An empty
    /// filter selects every section.
    pub fn for_sections(config: &Config, options: SinkOptions, names: &[String]) -> Result<Self> {
        if options.bulk_limit == 0 {
            return Err(MigrateError::Config("bulk_limit must be at least 1".into()));
        }

        let plans = config
            .select_sections(names)?
            .into_iter()
            .map(|section| {
                Ok(SectionPlan {
                    name: section.name.clone(),
                    target: section.target.trim().to_string(),
                    spec: SourceSpec::parse(&section.source),
                    mappings: MappingSet::from_section(section, &options)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { options, plans })
    }

    /// Names of the sections this migrator will run.
    pub fn section_names(&self) -> Vec<&str> {
        self.plans.iter().map(|p| p.name.as_str()).collect()
    }

    /// Run every section in order.
    ///
    /// Fatal errors and, under the abort policy, any error stop the run.
    /// Rows committed before the failure stay committed, and the returned
    /// [`MigrateError::Aborted`] carries the report of that work.
    pub async fn run<C: TargetConnection>(&self, conn: &mut C) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let mut sections = Vec::with_capacity(self.plans.len());
        let mut failure = None;
        for plan in &self.plans {
            let (report, outcome) = self
                .run_section(plan, conn)
                .instrument(info_span!("section", name = %plan.name))
                .await;
            sections.push(report);
            if let Err(e) = outcome {
                failure = Some(e);
                break;
            }
        }

        let report = MigrationReport::new(run_id, started_at, sections, failure.as_ref());
        if let Some(error) = failure {
            error!(
                "Migration aborted after {} rows written in {} batch(es): {}",
                report.rows_written,
                report
                    .sections
                    .iter()
                    .map(|s| s.stats.batches_committed)
                    .sum::<u64>(),
                error
            );
            return Err(MigrateError::Aborted {
                error: Box::new(error),
                report: Box::new(report),
            });
        }
        info!(
            "Migration {}: {} rows written, {} skipped, {} failed in {:.1}s",
            report.status,
            report.rows_written,
            report.rows_skipped,
            report.rows_failed,
            report.duration_seconds
        );
        Ok(report)
    }

    /// Drive one section through its own sink, closing the sink on every path.
    /// The report is returned whatever the outcome.
    async fn run_section<C: TargetConnection>(
        &self,
        plan: &SectionPlan,
        conn: &mut C,
    ) -> (SectionReport, Result<()>) {
        info!("Section {} -> {}", plan.name, plan.target);
        let mut report = SectionReport {
            name: plan.name.clone(),
            target: plan.target.clone(),
            sources: Vec::new(),
            stats: SinkStats::default(),
            failures: Vec::new(),
        };

        let mut sink = build_sink(conn, &plan.target, plan.mappings.target_columns(), &self.options);
        let driven = self.drive_section(plan, sink.as_mut(), &mut report).await;
        let closed = sink
            .close()
            .await
            .map_err(|e| e.with_row_context(&plan.name, None));
        report.stats = sink.stats();

        let outcome = match (driven, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    error!("Closing sink for {} also failed: {}", plan.target, close_err);
                }
                Err(e)
            }
            (Ok(()), Err(e)) => self.tolerate(e, &plan.name, &mut report),
            (Ok(()), Ok(())) => Ok(()),
        };
        (report, outcome)
    }

    async fn drive_section(
        &self,
        plan: &SectionPlan,
        sink: &mut (dyn Sink + '_),
        report: &mut SectionReport,
    ) -> Result<()> {
        let paths = match &plan.spec {
            SourceSpec::Static => {
                let values = plan.mappings.literal_row()?;
                let before = sink.stats();
                let result = sink.accept(values).await;
                let mut source_report = SourceReport::named(STATIC_SOURCE);
                source_report.rows_read = 1;
                source_report.record_sink(before, sink.stats());
                report.sources.push(source_report);
                if let Err(e) = result {
                    let e = e.with_row_context(&plan.name, Some(1));
                    self.tolerate(e, STATIC_SOURCE, report)?;
                }
                return Ok(());
            }
            SourceSpec::Paths(paths) => paths,
        };

        if paths.is_empty() {
            return Err(MigrateError::Config(format!(
                "section {:?} lists no sources",
                plan.name
            )));
        }

        for path in paths {
            let locators = match SourceLocator::expand(path) {
                Ok(locators) => locators,
                Err(e) => {
                    self.tolerate(e, &path.display().to_string(), report)?;
                    continue;
                }
            };

            for locator in locators {
                let name = locator.name();
                let mut source_report = SourceReport::named(&name);
                let before = sink.stats();
                let result = self
                    .drive_source(&locator, &plan.mappings, sink, &mut source_report)
                    .instrument(info_span!("source", name = %name))
                    .await;
                source_report.record_sink(before, sink.stats());
                report.sources.push(source_report);
                if let Err(e) = result {
                    self.tolerate(e, &name, report)?;
                }
            }
        }
        Ok(())
    }

    async fn drive_source(
        &self,
        locator: &SourceLocator,
        mappings: &MappingSet,
        sink: &mut (dyn Sink + '_),
        report: &mut SourceReport,
    ) -> Result<()> {
        let started = Instant::now();
        let name = locator.name();
        let mut source = locator.open()?;
        if source.is_empty() {
            warn!("{} has no header, skipping", name);
            return Ok(());
        }
        let bound = mappings.bind(source.header(), &name)?;
        info!("Reading {}", name);

        loop {
            let row = match source.next_row() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    report.rows_skipped = source.skipped();
                    return Err(e);
                }
            };
            let number = row.number;
            let values = bound.evaluate(row.record);
            report.rows_read += 1;

            if let Err(e) = sink.accept(values).await {
                report.rows_skipped = source.skipped();
                return Err(e.with_row_context(&name, Some(number)));
            }
        }

        report.rows_skipped = source.skipped();
        info!(
            "Finished {}: {} rows read, {} skipped in {:.2}s",
            name,
            report.rows_read,
            report.rows_skipped,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Apply the error policy to a failed source: propagate, or log and record.
    fn tolerate(&self, err: MigrateError, source: &str, report: &mut SectionReport) -> Result<()> {
        if err.is_fatal() || self.options.error_policy() == ErrorPolicy::Abort {
            return Err(err);
        }
        error!("Source {} failed, continuing: {}", source, err);
        report.failures.push(SourceFailure {
            source: source.to_string(),
            error: err.to_string(),
        });
        Ok(())
    }
}
