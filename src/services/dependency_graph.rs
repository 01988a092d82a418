use crate::domain::models::{DependencyConfig, DependencyKind, DependencySpec, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A dependency that points at a task not present in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub task_id: String,
    pub missing: String,
}

/// Outcome of validating a plan's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub cycles: Vec<Vec<String>>,
    pub missing_dependencies: Vec<MissingDependency>,
    pub execution_order: Vec<String>,
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Derived readiness of one dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub task_id: String,
    pub kind: DependencyKind,
    /// Target status, or "missing" / "invalid"
    pub status: String,
    pub completion_percentage: f64,
    pub interface_ready: bool,
    pub satisfied: bool,
}

/// Service for validating dependency graphs and computing typed readiness
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    heuristics: DependencyConfig,
}

fn adjacency(tasks: &[Task]) -> (Vec<&str>, HashMap<&str, Vec<&str>>) {
    let mut order = Vec::with_capacity(tasks.len());
    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        if !graph.contains_key(task.id.as_str()) {
            order.push(task.id.as_str());
        }
        graph
            .entry(task.id.as_str())
            .or_default()
            .extend(task.dependency_ids());
    }
    (order, graph)
}

fn format_percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

impl DependencyResolver {
    pub fn new(heuristics: DependencyConfig) -> Self {
        Self { heuristics }
    }

    pub fn soft_threshold(&self) -> f64 {
        self.heuristics.soft_threshold
    }

    /// Find every cycle reachable by depth-first search.
    ///
    /// Uses an explicit stack so deep chains cannot overflow. Each cycle is
    /// reported as the path from the repeated node back to itself, so a
    /// self-dependency yields `[x, x]`.
    pub fn detect_cycles(&self, tasks: &[Task]) -> Vec<Vec<String>> {
        let (order, graph) = adjacency(tasks);
        let mut cycles = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        for root in order {
            if visited.contains(root) {
                continue;
            }
            visited.insert(root);
            on_stack.insert(root);
            path.push(root);
            // (node, index of next neighbor to visit)
            let mut frames: Vec<(&str, usize)> = vec![(root, 0)];

            while let Some(&(node, next)) = frames.last() {
                let neighbors = graph.get(node).map_or(&[][..], Vec::as_slice);
                let Some(&neighbor) = neighbors.get(next) else {
                    frames.pop();
                    on_stack.remove(node);
                    path.pop();
                    continue;
                };
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }

                if !visited.contains(neighbor) {
                    visited.insert(neighbor);
                    on_stack.insert(neighbor);
                    path.push(neighbor);
                    frames.push((neighbor, 0));
                } else if on_stack.contains(neighbor) {
                    if let Some(start) = path.iter().position(|id| *id == neighbor) {
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|id| (*id).to_string()).collect();
                        cycle.push(neighbor.to_string());
                        cycles.push(cycle);
                    }
                }
            }
        }

        cycles
    }

    /// Kahn's algorithm over the plan's tasks.
    ///
    /// Edges to ids outside the plan are ignored (they are reported by
    /// [`Self::validate`]). Ties keep plan order. Returns `false` when some
    /// task could not be ordered because of a cycle.
    pub fn topological_sort(&self, tasks: &[Task]) -> (Vec<String>, bool) {
        let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut nodes: Vec<&str> = Vec::new();

        for task in tasks {
            let id = task.id.as_str();
            if !in_degree.contains_key(id) {
                nodes.push(id);
            }
            let degree = in_degree.entry(id).or_insert(0);
            for dep in task.dependency_ids().filter(|d| known.contains(d)) {
                *degree += 1;
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut queue: VecDeque<&str> = nodes
            .iter()
            .copied()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut sorted = Vec::with_capacity(nodes.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            for &dependent in dependents.get(id).map_or(&[][..], Vec::as_slice) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        let complete = sorted.len() == nodes.len();
        (sorted, complete)
    }

    /// Full validation: cycles, unknown targets, malformed specs, ordering.
    pub fn validate(&self, tasks: &[Task]) -> ValidationReport {
        let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut errors = Vec::new();
        let mut missing_dependencies = Vec::new();

        for task in tasks {
            for raw in &task.dependencies {
                if let Err(message) = DependencySpec::parse(raw) {
                    errors.push(format!("Story '{}': {message}", task.id));
                }
                let target = DependencySpec::target_of(raw);
                if !known.contains(target) {
                    errors.push(format!(
                        "Story '{}' depends on non-existent story '{target}'",
                        task.id
                    ));
                    missing_dependencies.push(MissingDependency {
                        task_id: task.id.clone(),
                        missing: target.to_string(),
                    });
                }
            }
        }

        let cycles = self.detect_cycles(tasks);
        for cycle in &cycles {
            errors.push(format!("Dependency cycle detected: {}", cycle.join(" -> ")));
        }

        let (execution_order, sorted) = self.topological_sort(tasks);
        if !sorted && cycles.is_empty() {
            errors.push("Topological sort could not order every story".to_string());
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            cycles,
            missing_dependencies,
            execution_order,
            errors,
        }
    }

    fn completion_of(&self, target: &Task) -> f64 {
        if target.passed {
            1.0
        } else if target.status == TaskStatus::InProgress {
            (f64::from(target.attempts) * self.heuristics.in_progress_step)
                .min(self.heuristics.in_progress_cap)
        } else {
            0.0
        }
    }

    /// Typed readiness of every dependency of `task`. Ready only if all are.
    pub fn check_dependencies_ready(
        &self,
        task: &Task,
        all_tasks: &[Task],
    ) -> (bool, Vec<DependencyStatus>) {
        let by_id: HashMap<&str, &Task> = all_tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut statuses = Vec::with_capacity(task.dependencies.len());

        for raw in &task.dependencies {
            let Ok(spec) = DependencySpec::parse(raw) else {
                statuses.push(DependencyStatus {
                    task_id: DependencySpec::target_of(raw).to_string(),
                    kind: DependencyKind::Hard,
                    status: "invalid".to_string(),
                    completion_percentage: 0.0,
                    interface_ready: false,
                    satisfied: false,
                });
                continue;
            };

            let Some(target) = by_id.get(spec.task_id.as_str()) else {
                statuses.push(DependencyStatus {
                    task_id: spec.task_id,
                    kind: spec.kind,
                    status: "missing".to_string(),
                    completion_percentage: 0.0,
                    interface_ready: false,
                    satisfied: false,
                });
                continue;
            };

            let completion = self.completion_of(target);
            let interface_ready = target.passed
                || matches!(target.status, TaskStatus::InProgress | TaskStatus::Completed);
            let satisfied = match spec.kind {
                DependencyKind::Hard => target.passed,
                DependencyKind::Soft => completion >= self.heuristics.soft_threshold,
                DependencyKind::Interface => interface_ready,
            };

            statuses.push(DependencyStatus {
                task_id: spec.task_id,
                kind: spec.kind,
                status: target.status.as_str().to_string(),
                completion_percentage: completion,
                interface_ready,
                satisfied,
            });
        }

        let ready = statuses.iter().all(|s| s.satisfied);
        (ready, statuses)
    }

    /// Advisory messages for partially satisfied typed dependencies.
    pub fn warnings(&self, statuses: &[DependencyStatus]) -> Vec<String> {
        let threshold = self.heuristics.soft_threshold;
        statuses
            .iter()
            .filter_map(|status| match status.kind {
                DependencyKind::Soft
                    if status.completion_percentage >= threshold
                        && status.completion_percentage < 1.0 =>
                {
                    Some(format!(
                        "Soft dependency '{}' is {} complete (threshold: {})",
                        status.task_id,
                        format_percent(status.completion_percentage),
                        format_percent(threshold)
                    ))
                }
                DependencyKind::Interface
                    if status.interface_ready && status.completion_percentage < 1.0 =>
                {
                    Some(format!(
                        "Interface dependency '{}' has interface ready but implementation is {} complete",
                        status.task_id,
                        format_percent(status.completion_percentage)
                    ))
                }
                _ => None,
            })
            .collect()
    }
}
