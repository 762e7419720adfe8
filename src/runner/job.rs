//! Jobs and the job dependency graph

use crate::config;
use crate::error::{ConfigError, ConfigResult};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use tracing::instrument;

/// A named, ordered list of task steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub desc: Option<String>,

    /// Jobs that must run before this one
    pub needs: Vec<String>,

    pub if_: Option<String>,

    /// Task names, run one at a time
    pub steps: Vec<String>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Job {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    pub fn from_config(key: &str, config: config::JobConfig) -> Self {
        let id = config.id.unwrap_or_else(|| key.to_string());
        Job {
            name: config.name.unwrap_or_else(|| id.clone()),
            id,
            desc: config.desc,
            needs: config.needs,
            if_: config.if_,
            steps: config.steps,
        }
    }
}

/// Insertion-ordered jobs keyed by id
#[derive(Debug, Clone, Default)]
pub struct JobMap {
    jobs: IndexMap<String, Job>,
}

impl JobMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// `start` followed by every job that transitively needs it, in
    /// dependency order
    #[instrument(skip(self), fields(job_count = self.jobs.len()))]
    pub fn downstream(&self, start: &str) -> ConfigResult<Vec<&Job>> {
        if !self.jobs.contains_key(start) {
            return Err(ConfigError::JobNotFound(start.to_string()));
        }

        // job -> jobs that need it
        let mut dependents: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for job in self.jobs.values() {
            for need in &job.needs {
                if !self.jobs.contains_key(need) {
                    return Err(ConfigError::UndefinedJobNeed {
                        job: job.id.clone(),
                        need: need.clone(),
                    });
                }
                dependents.entry(need.as_str()).or_default().push(job.id.as_str());
            }
        }

        // Reachable subgraph
        let mut reachable: IndexSet<&str> = IndexSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        reachable.insert(start);
        queue.push_back(start);
        while let Some(id) = queue.pop_front() {
            for next in dependents.get(id).into_iter().flatten() {
                if reachable.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }

        // Kahn's algorithm restricted to the subgraph
        let mut in_degree: IndexMap<&str, usize> = reachable.iter().map(|id| (*id, 0)).collect();
        for id in &reachable {
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut sorted: Vec<&Job> = Vec::with_capacity(reachable.len());

        while let Some(id) = queue.pop_front() {
            if let Some(job) = self.jobs.get(id) {
                sorted.push(job);
            }
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        if sorted.len() < reachable.len() {
            return Err(ConfigError::JobCycle(start.to_string()));
        }

        Ok(sorted)
    }
}

impl FromIterator<Job> for JobMap {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        let mut map = JobMap::new();
        for job in iter {
            map.insert(job);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, needs: &[&str]) -> Job {
        let mut j = Job::new(id);
        j.needs = needs.iter().map(|n| n.to_string()).collect();
        j
    }

    fn ids(jobs: &[&Job]) -> Vec<String> {
        jobs.iter().map(|j| j.id.clone()).collect()
    }

    #[test]
    fn test_downstream_excludes_unrelated() {
        let jobs: JobMap = vec![job("a", &[]), job("b", &["a"]), job("c", &["b"]), job("d", &[])]
            .into_iter()
            .collect();

        assert_eq!(ids(&jobs.downstream("a").unwrap()), vec!["a", "b", "c"]);
        assert_eq!(ids(&jobs.downstream("b").unwrap()), vec!["b", "c"]);
        assert_eq!(ids(&jobs.downstream("d").unwrap()), vec!["d"]);
    }

    #[test]
    fn test_downstream_diamond_waits_for_all_inputs() {
        let jobs: JobMap = vec![
            job("a", &[]),
            job("left", &["a"]),
            job("right", &["a"]),
            job("join", &["left", "right"]),
        ]
        .into_iter()
        .collect();

        let order = ids(&jobs.downstream("a").unwrap());
        assert_eq!(order.first().map(String::as_str), Some("a"));
        assert_eq!(order.last().map(String::as_str), Some("join"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_downstream_partial_needs_outside_subgraph() {
        // join also needs x, which is not downstream of a
        let jobs: JobMap = vec![job("a", &[]), job("x", &[]), job("join", &["a", "x"])]
            .into_iter()
            .collect();

        assert_eq!(ids(&jobs.downstream("a").unwrap()), vec!["a", "join"]);
    }

    #[test]
    fn test_downstream_cycle() {
        let jobs: JobMap = vec![job("a", &["c"]), job("b", &["a"]), job("c", &["b"])]
            .into_iter()
            .collect();

        assert!(matches!(jobs.downstream("a"), Err(ConfigError::JobCycle(_))));
    }

    #[test]
    fn test_downstream_errors() {
        let jobs: JobMap = vec![job("a", &["ghost"])].into_iter().collect();
        assert!(matches!(
            jobs.downstream("a"),
            Err(ConfigError::UndefinedJobNeed { .. })
        ));
        assert!(matches!(
            jobs.downstream("zzz"),
            Err(ConfigError::JobNotFound(_))
        ));
    }
}
