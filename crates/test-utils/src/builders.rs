#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use opgraph::{Datum, ExecutableBuilder, NodeRef};
use serde_json::json;

/// Executable with no dependencies that returns `value`.
pub fn constant(name: &str, value: Datum) -> NodeRef {
    ExecutableBuilder::new(name).run_sync(move |_| Ok(value.clone()))
}

/// Executable that always fails with `message`.
pub fn failing(name: &str, deps: &[(&str, NodeRef)], message: &str) -> NodeRef {
    let message = message.to_string();
    with_deps(name, deps).run_sync(move |_| Err(anyhow!(message.clone())))
}

/// Executable that sums every numeric input (non-numbers count as zero).
pub fn executable(name: &str, deps: &[(&str, NodeRef)]) -> NodeRef {
    with_deps(name, deps).run_sync(|ctx| Ok(json!(sum(ctx.values()))))
}

/// Like [`executable`], but bumps `counter` every time the body runs.
pub fn counted(name: &str, deps: &[(&str, NodeRef)], counter: Arc<AtomicUsize>) -> NodeRef {
    with_deps(name, deps).run_sync(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!(sum(ctx.values())))
    })
}

/// `len` executables where each depends on the previous one under key
/// `"prev"`. The first returns 1 and every later link adds 1.
pub fn chain(prefix: &str, len: usize) -> Vec<NodeRef> {
    let mut nodes: Vec<NodeRef> = Vec::with_capacity(len);
    for i in 0..len {
        let name = format!("{prefix}{i}");
        let node = match nodes.last() {
            None => constant(&name, json!(1)),
            Some(prev) => ExecutableBuilder::new(name)
                .dependency("prev", prev.clone())
                .run_sync(|ctx| Ok(json!(ctx["prev"].as_i64().unwrap_or(0) + 1))),
        };
        nodes.push(node);
    }
    nodes
}

fn with_deps(name: &str, deps: &[(&str, NodeRef)]) -> ExecutableBuilder {
    deps.iter()
        .fold(ExecutableBuilder::new(name), |builder, (key, node)| {
            builder.dependency(*key, node.clone())
        })
}

fn sum<'a>(values: impl Iterator<Item = &'a Datum>) -> i64 {
    values.filter_map(Datum::as_i64).sum()
}

/// Contexts seen by a [`capture`] node, one entry per execution.
pub type Captured = Arc<Mutex<Vec<opgraph::Context>>>;

/// Executable that records the context it was called with and returns
/// `null`.
pub fn capture(name: &str, deps: &[(&str, NodeRef)]) -> (NodeRef, Captured) {
    let seen: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let node = with_deps(name, deps).run_sync(move |ctx| {
        sink.lock().expect("capture poisoned").push(ctx);
        Ok(Datum::Null)
    });
    (node, seen)
}
