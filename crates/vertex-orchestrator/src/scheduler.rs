// Workflow Task Scheduler
// DAG helpers: readiness, dependent maps, and graph validation.

use std::collections::{HashMap, HashSet};

use vertex_types::{Result, VertexError};

use crate::types::{Task, TaskStatus};

pub struct TaskScheduler;

impl TaskScheduler {
    /// All pending tasks whose dependencies are completed within the slice.
    /// Dependencies in `external_completed` (tasks outside the slice that
    /// already finished) also count as satisfied.
    pub fn ready_tasks<'a>(tasks: &'a [Task], external_completed: &HashSet<String>) -> Vec<&'a Task> {
        let completed: HashSet<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();

        tasks
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.dependencies.iter().all(|dep| {
                        completed.contains(dep.as_str()) || external_completed.contains(dep)
                    })
            })
            .collect()
    }

    /// Reverse edge map: dependency id -> ids depending on it (edges within
    /// the slice only).
    pub fn dependents_map(tasks: &[Task]) -> HashMap<String, Vec<String>> {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for task in tasks {
            for dep in &task.dependencies {
                if ids.contains(dep.as_str()) {
                    map.entry(dep.clone()).or_default().push(task.id.clone());
                }
            }
        }
        map
    }

    /// Validate a task graph: non-empty, unique ids, every dependency known
    /// (in the slice or in `known_ids`), and acyclic.
    pub fn validate(tasks: &[Task], known_ids: &HashSet<String>) -> Result<()> {
        if tasks.is_empty() {
            return Err(VertexError::InvalidInput("task list is empty".to_string()));
        }

        let task_ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        if task_ids.len() != tasks.len() {
            return Err(VertexError::InvalidInput(
                "duplicate task id in graph".to_string(),
            ));
        }

        for task in tasks {
            for dep in &task.dependencies {
                if !task_ids.contains(dep.as_str()) && !known_ids.contains(dep) {
                    return Err(VertexError::InvalidInput(format!(
                        "task '{}' has unknown dependency '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        if let Some(path) = Self::detect_cycle(tasks) {
            return Err(VertexError::InvalidInput(format!(
                "cycle in task graph: {}",
                path.join(" -> ")
            )));
        }

        Ok(())
    }

    /// First dependency cycle found, as the path that closes it.
    pub fn detect_cycle(tasks: &[Task]) -> Option<Vec<String>> {
        let task_map: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        for task in tasks {
            let mut visited = HashSet::new();
            let mut path = Vec::new();

            if Self::dfs_cycle(&task.id, &task_map, &mut visited, &mut path) {
                return Some(path);
            }
        }

        None
    }

    fn dfs_cycle(
        task_id: &str,
        task_map: &HashMap<&str, &Task>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if path.iter().any(|p| p == task_id) {
            path.push(task_id.to_string());
            return true;
        }

        if visited.contains(task_id) {
            return false;
        }

        visited.insert(task_id.to_string());
        path.push(task_id.to_string());

        if let Some(task) = task_map.get(task_id) {
            for dep in &task.dependencies {
                if Self::dfs_cycle(dep, task_map, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(id: &str, deps: Vec<&str>, status: TaskStatus) -> Task {
        let mut task = Task::new(format!("task {id}"))
            .with_id(id)
            .with_dependencies(deps.into_iter().map(String::from).collect());
        task.status = status;
        task
    }

    #[test]
    fn ready_tasks_respects_dependencies() {
        let tasks = vec![
            make_task("1", vec![], TaskStatus::Completed),
            make_task("2", vec!["1"], TaskStatus::Pending),
            make_task("3", vec!["2"], TaskStatus::Pending),
        ];

        let ready = TaskScheduler::ready_tasks(&tasks, &HashSet::new());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "2");
    }

    #[test]
    fn ready_tasks_honors_external_completed() {
        let tasks = vec![make_task("2", vec!["outside"], TaskStatus::Pending)];

        assert!(TaskScheduler::ready_tasks(&tasks, &HashSet::new()).is_empty());

        let external: HashSet<String> = ["outside".to_string()].into();
        let ready = TaskScheduler::ready_tasks(&tasks, &external);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn dependents_map_reverses_edges() {
        let tasks = vec![
            make_task("a", vec![], TaskStatus::Pending),
            make_task("b", vec!["a"], TaskStatus::Pending),
            make_task("c", vec!["a", "b"], TaskStatus::Pending),
        ];

        let map = TaskScheduler::dependents_map(&tasks);
        assert_eq!(map["a"], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(map["b"], vec!["c".to_string()]);
        assert!(!map.contains_key("c"));
    }

    #[test]
    fn detect_cycle_finds_loops() {
        let no_cycle = vec![
            make_task("1", vec![], TaskStatus::Pending),
            make_task("2", vec!["1"], TaskStatus::Pending),
            make_task("3", vec!["2"], TaskStatus::Pending),
        ];
        assert!(TaskScheduler::detect_cycle(&no_cycle).is_none());

        // 1 -> 2 -> 3 -> 1
        let cycle = vec![
            make_task("1", vec!["3"], TaskStatus::Pending),
            make_task("2", vec!["1"], TaskStatus::Pending),
            make_task("3", vec!["2"], TaskStatus::Pending),
        ];
        assert!(TaskScheduler::detect_cycle(&cycle).is_some());
    }

    #[test]
    fn validate_rejects_bad_graphs() {
        let empty: Vec<Task> = vec![];
        assert!(TaskScheduler::validate(&empty, &HashSet::new()).is_err());

        let dup = vec![
            make_task("1", vec![], TaskStatus::Pending),
            make_task("1", vec![], TaskStatus::Pending),
        ];
        assert!(TaskScheduler::validate(&dup, &HashSet::new()).is_err());

        let unknown_dep = vec![make_task("1", vec!["ghost"], TaskStatus::Pending)];
        assert!(TaskScheduler::validate(&unknown_dep, &HashSet::new()).is_err());

        let known: HashSet<String> = ["ghost".to_string()].into();
        let external_dep = vec![make_task("1", vec!["ghost"], TaskStatus::Pending)];
        assert!(TaskScheduler::validate(&external_dep, &known).is_ok());
    }
}
