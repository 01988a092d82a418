//! Persisted priority queue of ideas waiting to become plans.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::{QueueError, QueueResult};
use crate::domain::models::{IdeaStatus, QueueCounts, QueuedIdea};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueDocument {
    ideas: Vec<QueuedIdea>,
    updated_at: DateTime<Utc>,
}

/// File-backed idea queue. Every mutation is saved before returning.
#[derive(Debug)]
pub struct IdeaQueue {
    path: PathBuf,
    ideas: Vec<QueuedIdea>,
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl IdeaQueue {
    /// Open the queue at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> QueueResult<Self> {
        let path = path.into();
        let ideas = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| QueueError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<QueueDocument>(&raw)?.ideas
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), ideas = ideas.len(), "idea queue loaded");
        Ok(Self { path, ideas })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `ideas` to a synced temporary sibling, then rename it over the queue.
    fn save(&self, ideas: &[QueuedIdea]) -> QueueResult<()> {
        let io_err = |source| QueueError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let document = QueueDocument {
            ideas: ideas.to_vec(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    /// Run `f` on a copy of the ideas. The copy replaces the live list only
    /// once it has been saved, so a failed write leaves the queue untouched.
    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Vec<QueuedIdea>) -> QueueResult<(T, bool)>,
    ) -> QueueResult<T> {
        let mut ideas = self.ideas.clone();
        let (value, changed) = f(&mut ideas)?;
        if changed {
            self.save(&ideas)?;
            self.ideas = ideas;
        }
        Ok(value)
    }

    /// Update one idea in place and persist the result.
    fn update(&mut self, id: &str, f: impl FnOnce(&mut QueuedIdea)) -> QueueResult<()> {
        self.transact(|ideas| {
            let idea = ideas
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| QueueError::IdeaNotFound(id.to_string()))?;
            f(idea);
            Ok(((), true))
        })
    }

    /// Enqueue a description. Lower priority is processed sooner.
    pub fn add(&mut self, description: impl Into<String>, priority: i32) -> QueueResult<QueuedIdea> {
        let idea = QueuedIdea::new(short_id(), description, priority);
        self.transact(|ideas| {
            ideas.push(idea.clone());
            Ok(((), true))
        })?;
        info!(id = %idea.id, priority, "idea queued");
        Ok(idea)
    }

    /// Enqueue several descriptions, keeping their order via priority offsets.
    pub fn add_many<I, S>(&mut self, descriptions: I, priority: i32) -> QueueResult<Vec<QueuedIdea>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut offset = priority;
        let added: Vec<QueuedIdea> = descriptions
            .into_iter()
            .map(|description| {
                let idea = QueuedIdea::new(short_id(), description, offset);
                offset = offset.saturating_add(1);
                idea
            })
            .collect();
        self.transact(|ideas| {
            ideas.extend(added.iter().cloned());
            Ok(((), !added.is_empty()))
        })?;
        Ok(added)
    }

    pub fn get(&self, id: &str) -> Option<&QueuedIdea> {
        self.ideas.iter().find(|i| i.id == id)
    }

    /// Pending idea with the smallest priority. Ties go to the oldest.
    pub fn get_next(&self) -> Option<&QueuedIdea> {
        self.ideas
            .iter()
            .filter(|i| i.status == IdeaStatus::Pending)
            .min_by_key(|i| i.priority)
    }

    pub fn start(&mut self, id: &str) -> QueueResult<()> {
        self.update(id, |idea| {
            idea.status = IdeaStatus::InProgress;
            idea.started_at = Some(Utc::now());
        })
    }

    pub fn complete(
        &mut self,
        id: &str,
        success: bool,
        error: Option<String>,
        iterations: u32,
        plan_path: Option<String>,
    ) -> QueueResult<()> {
        self.update(id, |idea| {
            idea.status = if success {
                IdeaStatus::Completed
            } else {
                IdeaStatus::Failed
            };
            idea.completed_at = Some(Utc::now());
            idea.error = error;
            idea.iterations = iterations;
            idea.plan_path = plan_path;
        })
    }

    pub fn skip(&mut self, id: &str, reason: impl Into<String>) -> QueueResult<()> {
        let reason = reason.into();
        self.update(id, |idea| {
            idea.status = IdeaStatus::Skipped;
            idea.notes = reason;
        })
    }

    pub fn reorder(&mut self, id: &str, priority: i32) -> QueueResult<()> {
        self.update(id, |idea| idea.priority = priority)
    }

    /// Remove an idea. `false` if it was not queued.
    pub fn remove(&mut self, id: &str) -> QueueResult<bool> {
        self.transact(|ideas| {
            let before = ideas.len();
            ideas.retain(|i| i.id != id);
            let removed = ideas.len() != before;
            Ok((removed, removed))
        })
    }

    /// Drop completed, failed and skipped ideas. Returns how many were dropped.
    pub fn clear_completed(&mut self) -> QueueResult<usize> {
        self.transact(|ideas| {
            let before = ideas.len();
            ideas.retain(|i| !i.status.is_finished());
            let removed = before - ideas.len();
            Ok((removed, removed > 0))
        })
    }

    pub fn list_pending(&self) -> Vec<&QueuedIdea> {
        let mut pending: Vec<&QueuedIdea> = self
            .ideas
            .iter()
            .filter(|i| i.status == IdeaStatus::Pending)
            .collect();
        pending.sort_by_key(|i| i.priority);
        pending
    }

    /// In-progress ideas first, then by priority.
    pub fn list_all(&self) -> Vec<&QueuedIdea> {
        let mut all: Vec<&QueuedIdea> = self.ideas.iter().collect();
        all.sort_by_key(|i| (i.status != IdeaStatus::InProgress, i.priority));
        all
    }

    pub fn count(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            total: self.ideas.len(),
            ..QueueCounts::default()
        };
        for idea in &self.ideas {
            match idea.status {
                IdeaStatus::Pending => counts.pending += 1,
                IdeaStatus::InProgress => counts.in_progress += 1,
                IdeaStatus::Completed => counts.completed += 1,
                IdeaStatus::Failed => counts.failed += 1,
                IdeaStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue(dir: &TempDir) -> IdeaQueue {
        IdeaQueue::open(dir.path().join("queue.json")).unwrap()
    }

    #[test]
    fn test_get_next_prefers_lowest_priority() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        queue.add("A", 5).unwrap();
        queue.add("B", 1).unwrap();
        assert_eq!(queue.get_next().unwrap().description, "B");
    }

    #[test]
    fn test_completed_item_leaves_pending_list() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        let idea = queue.add("build a CLI", 1).unwrap();
        queue.start(&idea.id).unwrap();
        queue
            .complete(&idea.id, true, None, 7, Some("plans/cli.json".into()))
            .unwrap();

        assert!(queue.list_pending().is_empty());
        let stored = queue.get(&idea.id).unwrap();
        assert_eq!(stored.status, IdeaStatus::Completed);
        assert_eq!(stored.iterations, 7);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_add_many_preserves_submission_order() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        let added = queue.add_many(["first", "second", "third"], 3).unwrap();
        let priorities: Vec<i32> = added.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![3, 4, 5]);
        let pending: Vec<&str> = queue
            .list_pending()
            .iter()
            .map(|i| i.description.as_str())
            .collect();
        assert_eq!(pending, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let mut queue = open_queue(&dir);
            let idea = queue.add("persist me", 2).unwrap();
            queue.skip(&idea.id, "not now").unwrap();
            idea.id
        };

        let queue = open_queue(&dir);
        let idea = queue.get(&id).unwrap();
        assert_eq!(idea.status, IdeaStatus::Skipped);
        assert_eq!(idea.notes, "not now");
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn test_clear_completed_and_count() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        let a = queue.add("a", 1).unwrap();
        let b = queue.add("b", 2).unwrap();
        queue.add("c", 3).unwrap();
        queue.complete(&a.id, false, Some("boom".into()), 1, None).unwrap();
        queue.start(&b.id).unwrap();

        let counts = queue.count();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total, 3);

        assert_eq!(queue.clear_completed().unwrap(), 1);
        assert_eq!(queue.count().total, 2);
    }

    #[test]
    fn test_list_all_puts_in_progress_first() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        queue.add("first", 1).unwrap();
        let late = queue.add("late", 9).unwrap();
        queue.start(&late.id).unwrap();

        let order: Vec<&str> = queue
            .list_all()
            .iter()
            .map(|i| i.description.as_str())
            .collect();
        assert_eq!(order, vec!["late", "first"]);
    }

    #[test]
    fn test_reorder_and_remove() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        let a = queue.add("a", 1).unwrap();
        let b = queue.add("b", 2).unwrap();
        queue.reorder(&b.id, 0).unwrap();
        assert_eq!(queue.get_next().unwrap().id, b.id);

        assert!(queue.remove(&a.id).unwrap());
        assert!(!queue.remove(&a.id).unwrap());
        assert!(matches!(
            queue.start("nope"),
            Err(QueueError::IdeaNotFound(_))
        ));
    }

    #[test]
    fn test_failed_save_leaves_queue_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let mut queue = IdeaQueue::open(&path).unwrap();
        let first = queue.add("first", 1).unwrap();

        // A directory in the temp file's place makes every save fail
        let blocker = dir.path().join("queue.json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(matches!(queue.add("second", 2), Err(QueueError::Io { .. })));
        assert!(queue.reorder(&first.id, 9).is_err());
        assert!(queue.remove(&first.id).is_err());
        assert_eq!(queue.count().total, 1);
        assert_eq!(queue.get(&first.id).unwrap().priority, 1);

        fs::remove_dir(&blocker).unwrap();
        queue.add("third", 3).unwrap();
        let reopened = IdeaQueue::open(&path).unwrap();
        let stored: Vec<&str> = reopened
            .list_all()
            .iter()
            .map(|i| i.description.as_str())
            .collect();
        assert_eq!(stored, vec!["first", "third"]);
    }

    #[test]
    fn test_add_many_saturates_priority() {
        let dir = TempDir::new().unwrap();
        let mut queue = open_queue(&dir);
        let added = queue.add_many(["x", "y", "z"], i32::MAX - 1).unwrap();
        let priorities: Vec<i32> = added.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![i32::MAX - 1, i32::MAX, i32::MAX]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            IdeaQueue::open(&path),
            Err(QueueError::Serialization(_))
        ));
    }
}
