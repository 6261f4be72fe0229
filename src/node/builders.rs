// src/node/builders.rs

//! Fluent builders for executables and schedulers.
//!
//! ```ignore
//! let add = ExecutableBuilder::new("add")
//!     .dependency("a", a)
//!     .dependency("b", b)
//!     .run_sync(|ctx| {
//!         let sum = ctx["a"].as_i64().unwrap_or(0) + ctx["b"].as_i64().unwrap_or(0);
//!         Ok(json!(sum))
//!     });
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::node::{
    BoxFuture, Context, Datum, Dependencies, ExecuteFn, Executable, Fork, ForkFn, Node, NodeRef,
    Scheduler, SiblingFilter, Siblings, TaskContext,
};

/// Builder for [`Executable`] nodes.
#[derive(Debug, Clone)]
pub struct ExecutableBuilder {
    name: String,
    dependencies: Dependencies,
    siblings: Option<Siblings>,
}

impl ExecutableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Dependencies::new(),
            siblings: None,
        }
    }

    pub fn dependency(mut self, key: impl Into<String>, node: NodeRef) -> Self {
        self.dependencies.insert(key.into(), node);
        self
    }

    pub fn siblings<F>(mut self, dependencies: Dependencies, filter: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        let filter: SiblingFilter = Arc::new(filter);
        self.siblings = Some(Siblings {
            dependencies,
            filter,
        });
        self
    }

    /// Finish with an asynchronous body that also sees the task context and
    /// sibling contexts.
    pub fn run_with<F, Fut>(self, body: F) -> NodeRef
    where
        F: Fn(Context, TaskContext, Vec<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Datum>> + Send + 'static,
    {
        let body: ExecuteFn = Arc::new(
            move |ctx: Context, task: TaskContext, siblings: Vec<Context>| -> BoxFuture<anyhow::Result<Datum>> {
                Box::pin(body(ctx, task, siblings))
            },
        );
        NodeRef::new(Node::Executable(Executable {
            name: self.name,
            dependencies: self.dependencies,
            siblings: self.siblings,
            body,
        }))
    }

    /// Finish with an asynchronous body.
    pub fn run<F, Fut>(self, body: F) -> NodeRef
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Datum>> + Send + 'static,
    {
        self.run_with(move |ctx, _task, _siblings| body(ctx))
    }

    /// Finish with a synchronous body.
    pub fn run_sync<F>(self, body: F) -> NodeRef
    where
        F: Fn(Context) -> anyhow::Result<Datum> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        self.run_with(move |ctx, _task, _siblings| {
            let body = Arc::clone(&body);
            async move { body(ctx) }
        })
    }
}

/// Builder for [`Scheduler`] nodes.
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
    name: String,
    dependencies: Dependencies,
}

impl SchedulerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Dependencies::new(),
        }
    }

    pub fn dependency(mut self, key: impl Into<String>, node: NodeRef) -> Self {
        self.dependencies.insert(key.into(), node);
        self
    }

    /// Finish with an asynchronous fork body.
    pub fn fork<F, Fut>(self, body: F) -> NodeRef
    where
        F: Fn(Context, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<Fork>>> + Send + 'static,
    {
        let body: ForkFn = Arc::new(
            move |ctx: Context, task: TaskContext| -> BoxFuture<anyhow::Result<Vec<Fork>>> {
                Box::pin(body(ctx, task))
            },
        );
        NodeRef::new(Node::Scheduler(Scheduler {
            name: self.name,
            dependencies: self.dependencies,
            body,
        }))
    }

    /// Finish with a synchronous fork body.
    pub fn fork_sync<F>(self, body: F) -> NodeRef
    where
        F: Fn(Context) -> anyhow::Result<Vec<Fork>> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        self.fork(move |ctx, _task| {
            let body = Arc::clone(&body);
            async move { body(ctx) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use serde_json::json;

    #[tokio::test]
    async fn sync_body_is_wrapped_into_a_future() {
        let node = ExecutableBuilder::new("double")
            .dependency("x", NodeRef::value(2))
            .run_sync(|ctx| Ok(json!(ctx["x"].as_i64().unwrap_or(0) * 2)));

        let Node::Executable(exe) = node.node() else {
            panic!("expected executable");
        };
        assert_eq!(exe.dependencies.len(), 1);

        let mut ctx = Context::new();
        ctx.insert("x".into(), json!(21));
        let task = TaskContext {
            run_name: "run".into(),
            scope_name: "run".into(),
            operation_name: "double".into(),
            explicit: true,
        };
        let out = (exe.body)(ctx, task, Vec::new()).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[test]
    fn scheduler_builder_produces_scheduler_kind() {
        let node = SchedulerBuilder::new("fan-out")
            .dependency("n", NodeRef::value(3))
            .fork_sync(|_| Ok(Vec::new()));
        assert_eq!(node.kind(), NodeKind::Scheduler);
        assert_eq!(node.name(), Some("fan-out"));
    }
}
