//! Trigger and predicate evaluation.
//!
//! Everything here is pure: deciding what runs for an event never touches a
//! process, the network or the filesystem.

use driftgate_core::event::{EventKind, RefName, TriggerEvent};
use driftgate_core::pattern::matches_any;
use driftgate_core::pipeline::{Job, JobPredicate, Pipeline, Trigger};
use serde::Serialize;

/// Jobs selected for one event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    /// Build-role jobs. Their outcomes decide the pipeline result.
    pub jobs: Vec<Job>,
    /// Maintenance jobs, run as decoupled tasks.
    pub maintenance: Vec<Job>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.maintenance.is_empty()
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .chain(self.maintenance.iter())
            .map(|j| j.name.as_str())
            .collect()
    }

    /// Keep only the named jobs.
    pub fn retain(&mut self, names: &[String]) {
        self.jobs.retain(|j| names.contains(&j.name));
        self.maintenance.retain(|j| names.contains(&j.name));
    }
}

/// Whether `trigger` accepts the ref carried by `event`.
fn accepts_ref(trigger: &Trigger, event: &TriggerEvent) -> bool {
    let git_ref = event.ref_name();
    let name = git_ref.short_name();

    match trigger.kind {
        EventKind::Push => {
            if trigger.branches.is_empty() && trigger.tags.is_empty() {
                return true;
            }
            (git_ref.could_be_branch() && matches_any(&trigger.branches, name))
                || (git_ref.could_be_tag() && matches_any(&trigger.tags, name))
        }
        EventKind::PullRequest => {
            trigger.branches.is_empty()
                || (!matches!(git_ref, RefName::PullRequest(_))
                    && matches_any(&trigger.branches, name))
        }
    }
}

/// Whether the changed paths leave anything outside the ignore list.
fn accepts_paths(trigger: &Trigger, event: &TriggerEvent) -> bool {
    if event.paths_changed.is_empty() || trigger.paths_ignore.is_empty() {
        return true;
    }
    event
        .paths_changed
        .iter()
        .any(|path| !matches_any(&trigger.paths_ignore, path))
}

/// True if any trigger of the event's kind accepts the event.
pub fn should_trigger(pipeline: &Pipeline, event: &TriggerEvent) -> bool {
    pipeline
        .triggers
        .iter()
        .filter(|t| t.kind == event.kind)
        .any(|t| accepts_ref(t, event) && accepts_paths(t, event))
}

/// Evaluate a job predicate against the event's ref.
pub fn should_run(event: &TriggerEvent, predicate: &JobPredicate) -> bool {
    let name = event.ref_name().short_name();

    if !predicate.only_refs.is_empty() && !matches_any(&predicate.only_refs, name) {
        return false;
    }
    !matches_any(&predicate.unless_refs, name)
}

/// Select the jobs to run for `event`. Empty when the pipeline is not triggered.
pub fn plan(pipeline: &Pipeline, event: &TriggerEvent) -> Plan {
    if !should_trigger(pipeline, event) {
        return Plan::default();
    }

    let (maintenance, jobs): (Vec<Job>, Vec<Job>) = pipeline
        .jobs
        .iter()
        .filter(|job| should_run(event, &job.predicate))
        .cloned()
        .partition(|job| job.is_maintenance());

    Plan { jobs, maintenance }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftgate_core::pattern::FilterPattern;
    use driftgate_core::pipeline::{JobEnvironment, JobRole};
    use driftgate_core::ResourceId;
    use std::collections::HashMap;

    fn patterns(list: &[&str]) -> Vec<FilterPattern> {
        list.iter().map(|p| FilterPattern::new(*p).unwrap()).collect()
    }

    fn job(name: &str, role: JobRole, unless: &[&str]) -> Job {
        Job {
            name: name.to_string(),
            role,
            environment: JobEnvironment::default(),
            predicate: JobPredicate {
                only_refs: Vec::new(),
                unless_refs: patterns(unless),
            },
            steps: Vec::new(),
            env: HashMap::new(),
        }
    }

    fn housekeeping() -> JobPredicate {
        JobPredicate {
            only_refs: Vec::new(),
            unless_refs: patterns(&["main", "v[0-9]+.[0-9]+.[0-9]+"]),
        }
    }

    fn pipeline(push_allow_list: bool) -> Pipeline {
        let mut push = Trigger::new(EventKind::Push);
        push.paths_ignore = patterns(&["docs/**", "**.md"]);
        if push_allow_list {
            push.branches = patterns(&["main"]);
            push.tags = patterns(&["v[0-9]+.[0-9]+.[0-9]+"]);
        }
        let mut pr = Trigger::new(EventKind::PullRequest);
        pr.paths_ignore = patterns(&["docs/**", "**.md"]);

        Pipeline {
            id: ResourceId::new(),
            name: "ci".to_string(),
            triggers: vec![push, pr],
            jobs: vec![
                job("cleanup-runs", JobRole::Maintenance, &["main", "v[0-9]+.[0-9]+.[0-9]+"]),
                job("build", JobRole::Build, &[]),
                job("build-wasm", JobRole::Build, &[]),
                job("build-tools", JobRole::Build, &[]),
                job("protobuf", JobRole::Build, &[]),
            ],
            env: HashMap::new(),
        }
    }

    #[test]
    fn test_housekeeping_predicate() {
        let predicate = housekeeping();
        assert!(!should_run(&TriggerEvent::push("main"), &predicate));
        assert!(!should_run(&TriggerEvent::push("refs/heads/main"), &predicate));
        assert!(!should_run(&TriggerEvent::push("v1.2.3"), &predicate));
        assert!(!should_run(&TriggerEvent::push("refs/tags/v1.2.3"), &predicate));
        assert!(should_run(&TriggerEvent::push("feature/x"), &predicate));
        assert!(should_run(&TriggerEvent::push("refs/heads/feature/x"), &predicate));
        assert!(should_run(&TriggerEvent::push("v1.2"), &predicate));
        assert!(should_run(
            &TriggerEvent::pull_request("refs/pull/7/merge"),
            &predicate
        ));
    }

    #[test]
    fn test_only_refs() {
        let predicate = JobPredicate {
            only_refs: patterns(&["release/**"]),
            unless_refs: Vec::new(),
        };
        assert!(should_run(&TriggerEvent::push("release/1.x"), &predicate));
        assert!(!should_run(&TriggerEvent::push("main"), &predicate));
        assert!(should_run(&TriggerEvent::push("main"), &JobPredicate::default()));
    }

    #[test]
    fn test_docs_only_change_suppresses_run() {
        let pipeline = pipeline(false);
        let event = TriggerEvent::pull_request("refs/pull/7/merge")
            .with_paths(["docs/readme.md", "CHANGELOG.md"]);
        assert!(!should_trigger(&pipeline, &event));

        let event = TriggerEvent::pull_request("refs/pull/7/merge")
            .with_paths(["docs/readme.md", "proto/src/lib.rs"]);
        assert!(should_trigger(&pipeline, &event));
    }

    #[test]
    fn test_empty_paths_never_suppress() {
        let pipeline = pipeline(false);
        assert!(should_trigger(
            &pipeline,
            &TriggerEvent::pull_request("refs/pull/7/merge")
        ));
    }

    #[test]
    fn test_push_allow_list() {
        let pipeline = pipeline(true);
        assert!(should_trigger(&pipeline, &TriggerEvent::push("refs/heads/main")));
        assert!(should_trigger(&pipeline, &TriggerEvent::push("refs/tags/v0.23.1")));
        assert!(should_trigger(&pipeline, &TriggerEvent::push("v0.23.1")));
        assert!(!should_trigger(&pipeline, &TriggerEvent::push("refs/heads/feature/x")));
        // A branch named like a release is not a tag
        assert!(!should_trigger(&pipeline, &TriggerEvent::push("refs/heads/v0.23.1")));
    }

    #[test]
    fn test_no_trigger_for_event_kind() {
        let mut pipeline = pipeline(false);
        pipeline.triggers.retain(|t| t.kind == EventKind::Push);
        assert!(!should_trigger(
            &pipeline,
            &TriggerEvent::pull_request("refs/pull/7/merge")
        ));
    }

    #[test]
    fn test_plan_push_to_main() {
        let plan = plan(&pipeline(true), &TriggerEvent::push("main"));
        let names: Vec<&str> = plan.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["build", "build-wasm", "build-tools", "protobuf"]);
        assert!(plan.maintenance.is_empty());
    }

    #[test]
    fn test_plan_docs_only_pull_request() {
        let event =
            TriggerEvent::pull_request("refs/pull/7/merge").with_paths(["docs/readme.md"]);
        assert!(plan(&pipeline(true), &event).is_empty());
    }

    #[test]
    fn test_plan_feature_branch_includes_housekeeping() {
        let plan = plan(&pipeline(false), &TriggerEvent::push("feature/x"));
        assert_eq!(plan.jobs.len(), 4);
        assert_eq!(plan.maintenance.len(), 1);
        assert_eq!(plan.maintenance[0].name, "cleanup-runs");
    }

    #[test]
    fn test_plan_release_tag() {
        let plan = plan(&pipeline(true), &TriggerEvent::push("v1.2.3"));
        assert_eq!(plan.jobs.len(), 4);
        assert!(plan.maintenance.is_empty());
    }

    #[test]
    fn test_plan_retain() {
        let mut plan = plan(&pipeline(false), &TriggerEvent::push("feature/x"));
        plan.retain(&["protobuf".to_string()]);
        assert_eq!(plan.job_names(), vec!["protobuf"]);
    }
}
