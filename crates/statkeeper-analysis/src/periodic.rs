//! Bookkeeping for periodic jobs.
//!
//! A periodic job is recorded once as a template. Each time its period
//! elapses the manager submits a one-shot instance built from the template.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use statkeeper_core::JobId;

use crate::info::AnalysisInfo;

/// A template whose period elapsed.
#[derive(Debug, Clone)]
pub(crate) struct DueRun {
    pub(crate) template: AnalysisInfo,
    /// Instance submitted on the previous run, if any.
    pub(crate) previous_instance: Option<JobId>,
}

#[derive(Debug)]
struct PeriodEntry {
    template: AnalysisInfo,
    period: chrono::Duration,
    next_due: DateTime<Utc>,
    instance: Option<JobId>,
}

/// Registered templates and the scheduler loop driving them.
#[derive(Debug, Default)]
pub(crate) struct PeriodicRegistry {
    entries: BTreeMap<JobId, PeriodEntry>,
    ticker: Option<JoinHandle<()>>,
}

impl PeriodicRegistry {
    /// Registers a template. The first run is due one period after its last
    /// execution, or after its creation if it never ran.
    pub(crate) fn register(&mut self, template: AnalysisInfo) -> bool {
        let Some(period) = template
            .period()
            .and_then(|p| chrono::Duration::from_std(p).ok())
        else {
            return false;
        };
        let anchor = template.last_exec_time.unwrap_or(template.created_at);
        let entry = PeriodEntry {
            next_due: anchor + period,
            period,
            instance: None,
            template,
        };
        self.entries.insert(entry.template.job_id, entry);
        true
    }

    pub(crate) fn unregister(&mut self, job_id: JobId) -> bool {
        self.entries.remove(&job_id).is_some()
    }

    /// Returns the templates due at `now` and schedules their next run.
    ///
    /// Missed periods are skipped rather than run back to back.
    pub(crate) fn take_due(&mut self, now: DateTime<Utc>) -> Vec<DueRun> {
        self.entries
            .values_mut()
            .filter(|entry| entry.next_due <= now)
            .map(|entry| {
                entry.next_due = now + entry.period;
                DueRun {
                    template: entry.template.clone(),
                    previous_instance: entry.instance,
                }
            })
            .collect()
    }

    /// Remembers the instance submitted for a template.
    pub(crate) fn set_instance(&mut self, template_id: JobId, instance: JobId) {
        if let Some(entry) = self.entries.get_mut(&template_id) {
            entry.instance = Some(instance);
        }
    }

    pub(crate) fn job_ids(&self) -> Vec<JobId> {
        self.entries.keys().copied().collect()
    }

    pub(crate) fn has_ticker(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub(crate) fn set_ticker(&mut self, ticker: JoinHandle<()>) {
        if let Some(previous) = self.ticker.replace(ticker) {
            previous.abort();
        }
    }

    /// Stops the loop and forgets every template.
    pub(crate) fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::AnalysisInfoBuilder;
    use statkeeper_core::TableName;

    fn template(period_secs: u64) -> AnalysisInfo {
        AnalysisInfoBuilder::new(TableName::internal("sales", "orders").unwrap())
            .column("a", ["p1"])
            .period_secs(period_secs)
            .build()
            .unwrap()
    }

    #[test]
    fn due_after_one_period() {
        let mut registry = PeriodicRegistry::default();
        let job = template(60);
        let created = job.created_at;
        assert!(registry.register(job.clone()));

        assert!(registry.take_due(created).is_empty());
        let due = registry.take_due(created + chrono::Duration::seconds(60));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].template.job_id, job.job_id);
        assert!(due[0].previous_instance.is_none());

        // Next run is one period after the run that just happened.
        assert!(registry.take_due(created + chrono::Duration::seconds(90)).is_empty());
        assert_eq!(registry.take_due(created + chrono::Duration::seconds(120)).len(), 1);
    }

    #[test]
    fn remembers_previous_instance() {
        let mut registry = PeriodicRegistry::default();
        let job = template(10);
        registry.register(job.clone());
        let instance = JobId::generate();
        registry.set_instance(job.job_id, instance);

        let due = registry.take_due(job.created_at + chrono::Duration::seconds(10));
        assert_eq!(due[0].previous_instance, Some(instance));
    }

    #[test]
    fn one_shot_jobs_are_not_registered() {
        let mut registry = PeriodicRegistry::default();
        let once = AnalysisInfoBuilder::new(TableName::internal("sales", "orders").unwrap())
            .build()
            .unwrap();
        assert!(!registry.register(once));
        assert!(registry.job_ids().is_empty());
    }
}
