//! Execution plans
//!
//! A plan is the dependency closure of the requested tasks: every task
//! reachable through dependency lists, each exactly once, dependencies before
//! the tasks that need them. The engine uses it to fire `onInit` hooks up front
//! and the entrypoint uses it to decide whether the run is a production build.

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::registry::Registry;
use crate::task::{TaskDescriptor, TaskError, TaskId};

/// Ordered, de-duplicated closure of one or more tasks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    tasks: Vec<TaskId>,
}

impl ExecutionPlan {
    /// Build the closure of `names`, resolved within `group`
    #[instrument(skip(registry), fields(requested = names.len()))]
    pub fn build(registry: &Registry, names: &[&str], group: Option<&str>) -> Result<Self, TaskError> {
        let mut walk = Walk {
            registry,
            visited: HashSet::new(),
            visiting: Vec::new(),
            order: Vec::new(),
        };
        for name in names {
            let descriptor = registry
                .get(name, group)
                .ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;
            walk.visit(descriptor)?;
        }

        debug!(tasks = walk.order.len(), "built execution plan");
        Ok(Self { tasks: walk.order })
    }

    /// Closure of a single registered task
    pub fn for_task(registry: &Registry, descriptor: &TaskDescriptor) -> Result<Self, TaskError> {
        let key = descriptor.full_name();
        Self::build(registry, &[key.as_str()], None)
    }

    /// Tasks in execution order
    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    /// Full names in execution order
    pub fn full_names(&self) -> Vec<String> {
        self.tasks.iter().map(TaskId::full_name).collect()
    }

    /// Descriptors in execution order
    pub fn descriptors<'r>(&'r self, registry: &'r Registry) -> impl Iterator<Item = &'r TaskDescriptor> {
        self.tasks
            .iter()
            .filter_map(move |id| registry.get_by_key(&id.full_name()))
    }

    /// Whether any task in the plan forces production mode
    pub fn requires_production(&self, registry: &Registry) -> bool {
        self.descriptors(registry).any(TaskDescriptor::is_production)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains(id)
    }
}

struct Walk<'r> {
    registry: &'r Registry,
    visited: HashSet<TaskId>,
    visiting: Vec<TaskId>,
    order: Vec<TaskId>,
}

impl<'r> Walk<'r> {
    fn visit(&mut self, descriptor: &'r TaskDescriptor) -> Result<(), TaskError> {
        let id = &descriptor.id;
        if self.visited.contains(id) {
            return Ok(());
        }
        if let Some(start) = self.visiting.iter().position(|v| v == id) {
            let mut path: Vec<String> = self.visiting[start..].iter().map(TaskId::full_name).collect();
            path.push(id.full_name());
            return Err(TaskError::Cycle(path.join(" -> ")));
        }

        self.visiting.push(id.clone());
        for dependency in &descriptor.dependencies {
            let next = self
                .registry
                .get(dependency, descriptor.group())
                .ok_or_else(|| TaskError::UnknownTask(dependency.clone()))?;
            self.visit(next)?;
        }
        self.visiting.pop();

        self.visited.insert(id.clone());
        self.order.push(id.clone());
        Ok(())
    }
}
