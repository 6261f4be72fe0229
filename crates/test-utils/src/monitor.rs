use std::sync::{Mutex, MutexGuard};

use opgraph::{Monitor, RunSummary, TaskContext};

/// One observed event, in the order the engine reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Checkpoint { scope: String, name: String, explicit: bool },
    Started(String),
    Succeeded(String),
    Failed(String),
    Finished { successful: bool },
}

/// `Monitor` that records everything it is told, for assertions.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<Event>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().expect("recording monitor poisoned")
    }

    fn push(&self, event: Event) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// `(scope, name, explicit)` for every checkpoint reached.
    pub fn checkpoints(&self) -> Vec<(String, String, bool)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                Event::Checkpoint { scope, name, explicit } => {
                    Some((scope.clone(), name.clone(), *explicit))
                }
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> Vec<String> {
        self.names(|e| match e {
            Event::Started(name) => Some(name),
            _ => None,
        })
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.names(|e| match e {
            Event::Succeeded(name) => Some(name),
            _ => None,
        })
    }

    pub fn failed(&self) -> Vec<String> {
        self.names(|e| match e {
            Event::Failed(name) => Some(name),
            _ => None,
        })
    }

    fn names(&self, pick: impl Fn(&Event) -> Option<&String>) -> Vec<String> {
        self.lock().iter().filter_map(|e| pick(e).cloned()).collect()
    }
}

impl Monitor for RecordingMonitor {
    fn mark_checkpoint(&self, scope: &str, name: &str, explicit: bool) {
        self.push(Event::Checkpoint {
            scope: scope.to_string(),
            name: name.to_string(),
            explicit,
        });
    }

    fn task_started(&self, task: &TaskContext) {
        self.push(Event::Started(task.operation_name.clone()));
    }

    fn task_succeeded(&self, task: &TaskContext) {
        self.push(Event::Succeeded(task.operation_name.clone()));
    }

    fn task_failed(&self, task: &TaskContext, _error: &anyhow::Error) {
        self.push(Event::Failed(task.operation_name.clone()));
    }

    fn run_finished(&self, summary: &RunSummary) {
        self.push(Event::Finished {
            successful: summary.successful,
        });
    }
}
