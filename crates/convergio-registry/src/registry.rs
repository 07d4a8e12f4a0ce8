use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use convergio_types::{AgentStatus, AgentTier};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{broadcast, RwLock};

use crate::definition::{parse_agent_document, AgentDefinition};
use crate::error::RegistryError;

/// A loaded agent is reference-counted rather than copied into every
/// consumer. An in-flight turn holding an `AgentInstance` keeps the old
/// definition alive across a hot-reload until it finishes; there is no
/// separate drain step — once the last clone is dropped, the definition is
/// freed naturally (§4.1's "drain, then release").
pub type AgentInstance = Arc<AgentDefinition>;

/// Emitted by `AgentRegistry::watch` whenever the directory snapshot is
/// swapped, or when a reload attempt fails.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Reloaded { agent_count: usize },
    ReloadFailed { reason: String },
}

#[derive(Debug, Default, Clone)]
pub struct AgentFilter {
    pub tier: Option<AgentTier>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    fn matches(&self, def: &AgentDefinition) -> bool {
        if let Some(tier) = self.tier {
            if def.tier != tier {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &def.category != category {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !def.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if def.status != status {
                return false;
            }
        }
        true
    }
}

struct Snapshot {
    by_id: HashMap<String, AgentInstance>,
}

/// Dynamic registry of agent definitions loaded from a directory of
/// markdown documents with YAML front matter. Snapshots are swapped
/// atomically so readers never observe a partially loaded directory scan.
pub struct AgentRegistry {
    dir: PathBuf,
    known_tools: HashSet<String>,
    snapshot: RwLock<Arc<Snapshot>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl AgentRegistry {
    /// Build a registry with an empty snapshot; call `scan_and_load` to
    /// populate it before serving traffic.
    pub fn new(dir: impl Into<PathBuf>, known_tools: HashSet<String>) -> Self {
        let (tx, _rx) = broadcast::channel(32);
        Self {
            dir: dir.into(),
            known_tools,
            snapshot: RwLock::new(Arc::new(Snapshot {
                by_id: HashMap::new(),
            })),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Recursively scan `dir` for `*.md` agent definitions, parse and
    /// validate each, and atomically replace the served snapshot.
    /// Individual invalid or duplicate-id documents are logged and skipped
    /// rather than failing the whole scan; only a directory that yields
    /// zero valid definitions is an error.
    pub async fn scan_and_load(&self) -> Result<usize, RegistryError> {
        let dir = self.dir.clone();
        let known_tools = self.known_tools.clone();
        let by_id = tokio::task::spawn_blocking(move || scan_dir(&dir, &known_tools))
            .await
            .map_err(|e| RegistryError::Validation(format!("scan task panicked: {e}")))??;

        if by_id.is_empty() {
            return Err(RegistryError::EmptyRegistry);
        }

        let count = by_id.len();
        let mut guard = self.snapshot.write().await;
        *guard = Arc::new(Snapshot { by_id });
        Ok(count)
    }

    /// Fetch the current instance of an agent by id. Returns an `Arc`
    /// clone; callers may hold it across a later reload.
    pub async fn get(&self, agent_id: &str) -> Result<AgentInstance, RegistryError> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .by_id
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    pub async fn list(&self, filter: &AgentFilter) -> Vec<AgentInstance> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .by_id
            .values()
            .filter(|def| filter.matches(def))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.by_id.len()
    }

    /// Watch the backing directory for changes and rescan on a debounce
    /// timer, emitting `RegistryEvent`s as the snapshot is swapped. Runs
    /// until the returned task is aborted or the registry is dropped.
    pub async fn watch(self: Arc<Self>, debounce: Duration) -> Result<(), RegistryError> {
        let (raw_tx, mut raw_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let _ = raw_tx.send(res);
            })?;
        watcher.watch(&self.dir, RecursiveMode::Recursive)?;

        loop {
            let first = match raw_rx.recv().await {
                Some(event) => event,
                None => return Ok(()),
            };
            if let Err(e) = first {
                let _ = self.events.send(RegistryEvent::ReloadFailed {
                    reason: e.to_string(),
                });
                continue;
            }

            // Drain any further events that arrive within the debounce
            // window so a burst of saves triggers one rescan, not N.
            tokio::time::sleep(debounce).await;
            while raw_rx.try_recv().is_ok() {}

            match self.scan_and_load().await {
                Ok(agent_count) => {
                    let _ = self.events.send(RegistryEvent::Reloaded { agent_count });
                }
                Err(e) => {
                    let _ = self.events.send(RegistryEvent::ReloadFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

fn scan_dir(
    dir: &Path,
    known_tools: &HashSet<String>,
) -> Result<HashMap<String, AgentInstance>, RegistryError> {
    let mut by_id: HashMap<String, AgentInstance> = HashMap::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(RegistryError::Io(e)),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable agent file");
                    continue;
                }
            };
            match parse_agent_document(&raw, known_tools) {
                Ok(def) => {
                    if by_id.contains_key(&def.id) {
                        tracing::warn!(agent_id = %def.id, path = %path.display(), "duplicate agent id, skipping");
                        continue;
                    }
                    by_id.insert(def.id.clone(), Arc::new(def));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping invalid agent definition");
                }
            }
        }
    }

    Ok(by_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_agent(dir: &Path, file: &str, agent_id: &str) {
        let doc = format!(
            "---\nagent_id: {agent_id}\nname: Agent {agent_id}\nrole: tester\ntier: specialist\ncategory: qa\ncapabilities: [\"writes integration tests for the payments module\"]\n---\n{}\n",
            "x".repeat(60)
        );
        std::fs::write(dir.join(file), doc).unwrap();
    }

    #[tokio::test]
    async fn scan_loads_valid_definitions() {
        let tmp = tempfile::tempdir().unwrap();
        write_agent(tmp.path(), "a.md", "agent-a");
        write_agent(tmp.path(), "b.md", "agent-b");

        let registry = AgentRegistry::new(tmp.path(), HashSet::new());
        let count = registry.scan_and_load().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(registry.len().await, 2);

        let a = registry.get("agent-a").await.unwrap();
        assert_eq!(a.id, "agent-a");
    }

    #[tokio::test]
    async fn unknown_agent_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write_agent(tmp.path(), "a.md", "agent-a");
        let registry = AgentRegistry::new(tmp.path(), HashSet::new());
        registry.scan_and_load().await.unwrap();

        let err = registry.get("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new(tmp.path(), HashSet::new());
        let err = registry.scan_and_load().await.unwrap_err();
        assert!(matches!(err, RegistryError::EmptyRegistry));
    }

    #[tokio::test]
    async fn duplicate_ids_keep_the_first_and_skip_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        write_agent(tmp.path(), "a.md", "dup");
        write_agent(tmp.path(), "b.md", "dup");
        let registry = AgentRegistry::new(tmp.path(), HashSet::new());
        let count = registry.scan_and_load().await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn reload_swaps_snapshot_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        write_agent(tmp.path(), "a.md", "agent-a");
        let registry = Arc::new(AgentRegistry::new(tmp.path(), HashSet::new()));
        registry.scan_and_load().await.unwrap();
        let held = registry.get("agent-a").await.unwrap();

        write_agent(tmp.path(), "b.md", "agent-b");
        registry.scan_and_load().await.unwrap();

        assert_eq!(registry.len().await, 2);
        // the instance obtained before reload is still usable (Arc keeps it alive)
        assert_eq!(held.id, "agent-a");
    }

    #[tokio::test]
    async fn filter_by_tier_and_tag() {
        let tmp = tempfile::tempdir().unwrap();
        write_agent(tmp.path(), "a.md", "agent-a");
        let registry = AgentRegistry::new(tmp.path(), HashSet::new());
        registry.scan_and_load().await.unwrap();

        let filter = AgentFilter {
            tier: Some(AgentTier::Specialist),
            ..Default::default()
        };
        let found = registry.list(&filter).await;
        assert_eq!(found.len(), 1);

        let filter = AgentFilter {
            tier: Some(AgentTier::Executive),
            ..Default::default()
        };
        let found = registry.list(&filter).await;
        assert!(found.is_empty());
    }
}
