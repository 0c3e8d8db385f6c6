//! Memory manager (component G): CRUD, hybrid recall, time decay, conflict
//! detection, global-store merging, and compaction orchestration on top of
//! the durable store (component E) and the TF-IDF/vector indices
//! (components B, C).

use crate::cache::{make_cache_key, RECALL_CACHE};
use crate::embedding::Embedder;
use crate::entities;
use crate::graph::{self, CompactionOutcome};
use crate::index::vector::VectorMetadata;
use crate::index::{TfIdfIndex, VectorFilters, VectorIndex};
use crate::models::{Category, Memory, MemoryId, Worked, GLOBAL_PROJECT_PATH};
use crate::search::HybridSearcher;
use crate::storage::memories::NewMemory;
use crate::storage::Store;
use crate::text::tokenize_to_string;
use crate::{Error, EngineConfig, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Half-life, in days, of the recall decay curve.
pub const DEFAULT_DECAY_HALF_LIFE_DAYS: f64 = 30.0;
/// Floor a decayed score never drops below for non-permanent, unpinned memories.
pub const DEFAULT_DECAY_MIN_FLOOR: f32 = 0.3;
/// Similarity at or above which a new memory is checked for conflicts.
pub const CONFLICT_THRESHOLD: f32 = 0.6;
/// Similarity above which an unclassified conflict is a likely duplicate.
pub const DUPLICATE_THRESHOLD: f32 = 0.8;
/// Candidate pool size multiplier applied to `limit` before ranking.
pub const RECALL_POOL_MULTIPLIER: usize = 3;
/// Content-Jaccard threshold above which a global hit is considered a
/// duplicate of a local one and dropped.
pub const GLOBAL_DEDUPE_THRESHOLD: f32 = 0.6;
/// Max content length before condensed truncation.
pub const CONDENSED_CONTENT_MAX_CHARS: usize = 150;

const PROJECT_ANCHOR_PHRASES: &[&str] = &[
    "in this repo",
    "in this project",
    "in this codebase",
    "our team",
    "this application",
    "this service",
    "pr #",
    "ticket #",
];
const UNIVERSAL_PHRASES: &[&str] = &["always", "never", "prefer", "avoid"];
const KNOWN_LANGUAGES: &[&str] = &[
    "rust", "python", "javascript", "typescript", "go", "java", "c++", "c#", "ruby", "php",
    "kotlin", "swift",
];
const GLOBAL_TAGS: &[&str] = &["security", "best-practice", "anti-pattern", "architecture", "design-pattern"];

/// Why a candidate memory was flagged during conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The similar memory's recorded outcome was `worked = false`.
    SimilarFailed,
    /// The similar memory is itself a `warning`.
    ExistingWarning,
    /// High similarity with no other classification; likely a duplicate.
    PotentialDuplicate,
}

/// An advisory conflict surfaced (never blocking) by [`MemoryManager::remember`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedConflict {
    /// The existing memory this conflicts with.
    pub memory_id: MemoryId,
    /// Why it was flagged.
    pub kind: ConflictKind,
    /// Cosine similarity that triggered the flag.
    pub similarity: f32,
}

/// Where a memory lives after a [`MemoryManager::remember`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Stored only in this project's store.
    Local,
    /// Also propagated to the cross-project global store.
    Global,
}

impl Scope {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Global => "global",
        }
    }
}

/// Caller-supplied fields for [`MemoryManager::remember`].
#[derive(Debug, Clone)]
pub struct RememberInput {
    /// The memory's category.
    pub category: Category,
    /// Required content.
    pub content: String,
    /// Optional rationale.
    pub rationale: Option<String>,
    /// Structured context.
    pub context: Json,
    /// Tags.
    pub tags: Vec<String>,
    /// Absolute file path, if anchored.
    pub file_path: Option<String>,
    /// Project-relative file path, if known.
    pub file_path_relative: Option<String>,
    /// Overrides the category-derived `is_permanent` default.
    pub is_permanent_override: Option<bool>,
}

/// Result of a [`MemoryManager::remember`] call.
#[derive(Debug, Clone)]
pub struct RememberOutcome {
    /// The inserted row.
    pub memory: Memory,
    /// Where it ended up living.
    pub scope: Scope,
    /// Advisory conflicts detected against existing memories.
    pub conflicts: Vec<DetectedConflict>,
}

/// A recall query.
#[derive(Debug, Clone)]
pub struct RecallQuery {
    /// Free-text topic.
    pub topic: String,
    /// Category filter; empty means "all categories".
    pub categories: Vec<Category>,
    /// Maximum results per category bucket.
    pub limit: usize,
    /// Restrict to a single file path.
    pub file_path: Option<String>,
    /// Restrict to memories carrying at least one of these tags.
    pub tags: Vec<String>,
    /// Drop rationale/context and truncate content.
    pub condensed: bool,
}

/// One memory in a [`RecallResult`] bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalledMemory {
    /// The memory's id.
    pub id: MemoryId,
    /// Its category.
    pub category: Category,
    /// Its content, truncated if `condensed` was requested.
    pub content: String,
    /// Omitted entirely in condensed mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Omitted entirely in condensed mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Json>,
    /// Its tags.
    pub tags: Vec<String>,
    /// Its file path, if anchored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Final, decay-adjusted ranking score.
    pub score: f32,
    /// Set when this entry was merged in from the global store.
    #[serde(rename = "_from_global")]
    pub from_global: bool,
}

/// Result of a [`MemoryManager::recall`] call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallResult {
    /// The query topic, echoed back.
    pub topic: String,
    /// Total entries across every bucket.
    pub found: usize,
    /// `decision` bucket.
    pub decisions: Vec<RecalledMemory>,
    /// `pattern` bucket.
    pub patterns: Vec<RecalledMemory>,
    /// `warning` bucket.
    pub warnings: Vec<RecalledMemory>,
    /// `learning` bucket.
    pub learnings: Vec<RecalledMemory>,
}

impl RecallResult {
    fn ids(&self) -> impl Iterator<Item = MemoryId> + '_ {
        self.decisions
            .iter()
            .chain(&self.patterns)
            .chain(&self.warnings)
            .chain(&self.learnings)
            .map(|m| m.id)
    }
}

/// A memory still awaiting a recorded outcome, with its staleness relative
/// to `pending_decision_threshold_hours`.
#[derive(Debug, Clone)]
pub struct PendingDecision {
    /// The pending memory's id.
    pub memory_id: MemoryId,
    /// When it was created.
    pub created_at: DateTime<Utc>,
    /// Its age, in hours, as of the call.
    pub age_hours: f64,
    /// Whether it has aged past the blocking threshold.
    pub blocking: bool,
}

fn lock_poisoned() -> Error {
    Error::Fatal("memory manager lock poisoned".to_string())
}

/// A heuristic local/global scope classification (§4.G.6). Pure function,
/// unit-testable without a store.
///
/// A memory already anchored to a file, or whose text anchors it to this
/// project, is local. A memory stated as a universal practice AND tagged
/// with a known cross-project concern is global. Anything else (including
/// a call already against the global store) defaults to local.
#[must_use]
pub fn classify_scope(
    content: &str,
    rationale: Option<&str>,
    tags: &[String],
    file_path: Option<&str>,
    project_path: &str,
) -> Scope {
    if project_path == GLOBAL_PROJECT_PATH {
        return Scope::Local;
    }
    if file_path.is_some() {
        return Scope::Local;
    }
    let haystack = format!("{content} {}", rationale.unwrap_or("")).to_lowercase();
    if PROJECT_ANCHOR_PHRASES.iter().any(|p| haystack.contains(p)) {
        return Scope::Local;
    }
    let has_universal_phrase = UNIVERSAL_PHRASES.iter().any(|p| haystack.contains(p))
        || KNOWN_LANGUAGES.iter().any(|lang| haystack.contains(&format!("in {lang}")));
    let has_global_tag = tags.iter().any(|t| GLOBAL_TAGS.contains(&t.to_lowercase().as_str()));
    if has_universal_phrase && has_global_tag {
        Scope::Global
    } else {
        Scope::Local
    }
}

fn jaccard(a: &str, b: &str) -> f32 {
    let sa: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let sb: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f32;
    let union = sa.union(&sb).count() as f32;
    inter / union
}

fn decay_weight(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64, floor: f32) -> f32 {
    let age_days = (now - created_at).num_seconds() as f64 / 86_400.0;
    let decayed = (-std::f64::consts::LN_2 * age_days.max(0.0) / half_life_days).exp();
    (decayed as f32).max(floor)
}

fn to_recalled(memory: &Memory, score: f32, condensed: bool, from_global: bool) -> RecalledMemory {
    if condensed {
        RecalledMemory {
            id: memory.id,
            category: memory.category,
            content: Memory::condensed_content(&memory.content, CONDENSED_CONTENT_MAX_CHARS),
            rationale: None,
            context: None,
            tags: memory.tags.clone(),
            file_path: memory.file_path.clone(),
            score,
            from_global,
        }
    } else {
        RecalledMemory {
            id: memory.id,
            category: memory.category,
            content: memory.content.clone(),
            rationale: memory.rationale.clone(),
            context: Some(memory.context.clone()),
            tags: memory.tags.clone(),
            file_path: memory.file_path.clone(),
            score,
            from_global,
        }
    }
}

fn merge_global_bucket(local: &mut Vec<RecalledMemory>, incoming: Vec<RecalledMemory>, limit: usize) {
    for mut item in incoming {
        if local.len() >= limit {
            break;
        }
        let duplicate = local.iter().any(|existing| jaccard(&existing.content, &item.content) > GLOBAL_DEDUPE_THRESHOLD);
        if duplicate {
            continue;
        }
        item.from_global = true;
        local.push(item);
    }
}

/// Orchestrates one project's memory lifecycle: the durable store, the
/// in-memory TF-IDF and vector indices, optional dense embeddings, and
/// (for non-global managers) a shared handle to the cross-project global
/// manager.
pub struct MemoryManager {
    store: Store,
    project_path: String,
    vector_path: PathBuf,
    tfidf: Mutex<TfIdfIndex>,
    vector: Mutex<VectorIndex>,
    /// `None` until the index has been built at least once; otherwise the
    /// `memories_last_modified` value observed at the last (re)build.
    index_marker: Mutex<Option<String>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: EngineConfig,
    global: Option<Arc<MemoryManager>>,
}

impl MemoryManager {
    fn from_store(
        store: Store,
        project_path: impl Into<String>,
        config: EngineConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let vector_path = store.root().join("qdrant");
        let vector = VectorIndex::open(&vector_path);
        Self {
            store,
            project_path: project_path.into(),
            vector_path,
            tfidf: Mutex::new(TfIdfIndex::new()),
            vector: Mutex::new(vector),
            index_marker: Mutex::new(None),
            embedder,
            config,
            global: None,
        }
    }

    /// Opens the durable store rooted at `root` and builds a manager for it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store`/`Error::Fatal` per [`Store::open`].
    pub fn open(
        root: &Path,
        project_path: impl Into<String>,
        config: EngineConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let store = Store::open(root)?;
        Ok(Self::from_store(store, project_path, config, embedder))
    }

    /// Builds a manager over an in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` per [`Store::open_in_memory`].
    pub fn open_in_memory(
        project_path: impl Into<String>,
        config: EngineConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let store = Store::open_in_memory()?;
        Ok(Self::from_store(store, project_path, config, embedder))
    }

    /// Attaches a shared global-store manager; `remember` recurses into it
    /// for memories classified as global (§4.G.6). The global manager
    /// itself must not carry a further `global` handle, or recursion would
    /// not terminate.
    #[must_use]
    pub fn with_global(mut self, global: Arc<MemoryManager>) -> Self {
        self.global = Some(global);
        self
    }

    /// This manager's logical project identity (`"__global__"` for the
    /// cross-project store).
    #[must_use]
    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    /// The underlying durable store, for collaborators that need direct
    /// access (the protocol enforcer, the rules engine, the registry).
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn rebuild_index(&self) -> Result<()> {
        let memories = self.store.list_non_archived_memories()?;
        let mut tfidf = TfIdfIndex::new();
        let mut vector = VectorIndex::open(&self.vector_path);
        for memory in &memories {
            let text = format!("{} {}", memory.content, memory.rationale.as_deref().unwrap_or(""));
            tfidf.add_document(memory.id, &text, &memory.tags);
            if let Some(embedding) = memory.vector_embedding.clone() {
                let _ = vector.upsert(
                    memory.id,
                    embedding,
                    VectorMetadata {
                        category: memory.category,
                        tags: memory.tags.clone(),
                        file_path: memory.file_path.clone(),
                        worked: memory.worked,
                        is_permanent: memory.is_permanent,
                    },
                );
            }
        }
        *self.tfidf.lock().map_err(|_| lock_poisoned())? = tfidf;
        *self.vector.lock().map_err(|_| lock_poisoned())? = vector;
        Ok(())
    }

    /// Rebuilds the index, in full, if `memories_last_modified` has moved
    /// since the last (re)build (§4.G.1). No delta rebuilds.
    fn ensure_index_fresh(&self) -> Result<()> {
        let current = self.store.meta_get("memories_last_modified")?;
        let stale = {
            let marker = self.index_marker.lock().map_err(|_| lock_poisoned())?;
            *marker != current
        };
        if stale {
            self.rebuild_index()?;
            *self.index_marker.lock().map_err(|_| lock_poisoned())? = current;
        }
        Ok(())
    }

    /// After a local write that already patched the in-memory indices
    /// directly, syncs the freshness marker so the next query does not
    /// trigger a redundant full rebuild.
    fn sync_marker_after_local_write(&self) -> Result<()> {
        let current = self.store.meta_get("memories_last_modified")?;
        *self.index_marker.lock().map_err(|_| lock_poisoned())? = current;
        Ok(())
    }

    /// Ephemeral conflict detection (§4.G.5): builds a throwaway TF-IDF
    /// index over the new content plus every existing non-archived memory,
    /// and classifies any match at or above [`CONFLICT_THRESHOLD`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a read failure.
    fn detect_conflicts(&self, content: &str, tags: &[String]) -> Result<Vec<DetectedConflict>> {
        const NEW_CONTENT_ID: MemoryId = -1;
        let existing = self.store.list_non_archived_memories()?;
        let mut ephemeral = TfIdfIndex::new();
        ephemeral.add_document(NEW_CONTENT_ID, content, tags);
        for memory in &existing {
            let text = format!("{} {}", memory.content, memory.rationale.as_deref().unwrap_or(""));
            ephemeral.add_document(memory.id, &text, &memory.tags);
        }

        let mut conflicts = Vec::new();
        for memory in &existing {
            let similarity = ephemeral.document_similarity(NEW_CONTENT_ID, memory.id);
            if similarity < CONFLICT_THRESHOLD {
                continue;
            }
            let kind = if memory.worked == Worked::False {
                ConflictKind::SimilarFailed
            } else if memory.category == Category::Warning {
                ConflictKind::ExistingWarning
            } else if similarity > DUPLICATE_THRESHOLD {
                ConflictKind::PotentialDuplicate
            } else {
                continue;
            };
            conflicts.push(DetectedConflict { memory_id: memory.id, kind, similarity });
        }
        Ok(conflicts)
    }

    /// Creates a memory (§4.G.2): validates, tokenizes, runs conflict
    /// detection, encodes an embedding if available, persists, indexes,
    /// invalidates the recall cache, extracts entity mentions, and
    /// propagates a copy to the global store if classified global.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for empty content, otherwise
    /// `Error::Store` on a write failure.
    pub fn remember(&self, input: RememberInput) -> Result<RememberOutcome> {
        if input.content.trim().is_empty() {
            return Err(Error::Validation("memory content must not be empty".to_string()));
        }

        let is_permanent = input.is_permanent_override.unwrap_or_else(|| input.category.is_semantic());
        let keyword_text = format!("{} {}", input.content, input.rationale.as_deref().unwrap_or(""));
        let keywords = tokenize_to_string(&keyword_text, &input.tags);

        let conflicts = if input.category == Category::Warning {
            Vec::new()
        } else {
            self.detect_conflicts(&input.content, &input.tags)?
        };

        let vector_embedding = match &self.embedder {
            Some(embedder) => {
                let encode_text = format!("{} {}", input.content, input.rationale.as_deref().unwrap_or(""));
                Some(embedder.embed(&encode_text)?)
            }
            None => None,
        };

        let memory = self.store.insert_memory(&NewMemory {
            category: input.category,
            content: input.content.clone(),
            rationale: input.rationale.clone(),
            context: input.context.clone(),
            tags: input.tags.clone(),
            file_path: input.file_path.clone(),
            file_path_relative: input.file_path_relative.clone(),
            keywords,
            is_permanent,
            vector_embedding: vector_embedding.clone(),
        })?;

        {
            let mut tfidf = self.tfidf.lock().map_err(|_| lock_poisoned())?;
            let text = format!("{} {}", memory.content, memory.rationale.as_deref().unwrap_or(""));
            tfidf.add_document(memory.id, &text, &memory.tags);
        }
        if let Some(embedding) = vector_embedding {
            let mut vector = self.vector.lock().map_err(|_| lock_poisoned())?;
            vector.upsert(
                memory.id,
                embedding,
                VectorMetadata {
                    category: memory.category,
                    tags: memory.tags.clone(),
                    file_path: memory.file_path.clone(),
                    worked: memory.worked,
                    is_permanent: memory.is_permanent,
                },
            )?;
        }
        RECALL_CACHE.clear();
        self.sync_marker_after_local_write()?;

        entities::extract_and_store(
            &self.store,
            &self.project_path,
            memory.id,
            &memory.content,
            memory.rationale.as_deref(),
        )?;

        let scope = classify_scope(
            &memory.content,
            memory.rationale.as_deref(),
            &memory.tags,
            memory.file_path.as_deref(),
            &self.project_path,
        );
        if scope == Scope::Global && self.project_path != GLOBAL_PROJECT_PATH && self.config.global.write_enabled {
            if let Some(global) = &self.global {
                let _ = global.remember(RememberInput {
                    category: input.category,
                    content: input.content,
                    rationale: input.rationale,
                    context: input.context,
                    tags: input.tags,
                    file_path: None,
                    file_path_relative: None,
                    is_permanent_override: Some(is_permanent),
                })?;
            }
        }

        tracing::debug!(memory_id = memory.id, scope = scope.as_str(), "memory created");
        Ok(RememberOutcome { memory, scope, conflicts })
    }

    fn cache_key(&self, query: &RecallQuery) -> String {
        make_cache_key(&[
            ("topic", json!(query.topic)),
            ("categories", json!(query.categories.iter().map(|c| c.as_str()).collect::<Vec<_>>())),
            ("limit", json!(query.limit)),
            ("condensed", json!(query.condensed)),
            ("tags", json!(query.tags)),
            ("file_path", json!(query.file_path)),
            ("project_path", json!(self.project_path)),
        ])
    }

    /// Retrieves memories for `query` (§4.G.3): cache lookup, freshness
    /// check, hybrid search, archived filtering, decay re-ranking,
    /// per-file diversity cap, category bucketing, optional condensing,
    /// and a merge with the global store's results.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a read failure.
    pub fn recall(&self, query: &RecallQuery) -> Result<RecallResult> {
        let cache_key = self.cache_key(query);
        if let Some(cached) = RECALL_CACHE.get(&cache_key) {
            if let Ok(result) = serde_json::from_value::<RecallResult>(cached) {
                return Ok(result);
            }
        }

        self.ensure_index_fresh()?;

        let mut categories = query.categories.clone();
        if !categories.is_empty() && !categories.contains(&Category::Warning) {
            categories.push(Category::Warning);
        }

        let pool = query.limit.saturating_mul(RECALL_POOL_MULTIPLIER).max(query.limit);
        let query_embedding = self.embedder.as_ref().and_then(|e| e.embed(&query.topic).ok());
        let filters =
            VectorFilters { categories: categories.clone(), tags: query.tags.clone(), file_path: query.file_path.clone() };

        let scored = {
            let tfidf = self.tfidf.lock().map_err(|_| lock_poisoned())?;
            let vector = self.vector.lock().map_err(|_| lock_poisoned())?;
            let searcher = HybridSearcher::new(&tfidf, Some(&vector));
            searcher.search(&query.topic, query_embedding.as_deref(), pool, self.config.hybrid_vector_weight, &filters)
        };

        let now = Utc::now();
        let mut ranked: Vec<(Memory, f32)> = Vec::new();
        for hit in scored {
            let Some(memory) = self.store.get_memory(hit.id)? else { continue };
            if memory.archived {
                continue;
            }
            if !categories.is_empty() && !categories.contains(&memory.category) {
                continue;
            }
            if let Some(want_file) = &query.file_path {
                if memory.file_path.as_deref() != Some(want_file.as_str()) {
                    continue;
                }
            }
            if !query.tags.is_empty() && !memory.tags.iter().any(|t| query.tags.contains(t)) {
                continue;
            }
            let floor = memory.decay_floor(DEFAULT_DECAY_MIN_FLOOR);
            let weight = decay_weight(memory.created_at, now, DEFAULT_DECAY_HALF_LIFE_DAYS, floor);
            ranked.push((memory, hit.score * weight));
        }
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let diversity_cap = self.config.search_diversity_max_per_file;
        let mut per_file: HashMap<String, usize> = HashMap::new();
        let mut diversified = Vec::with_capacity(ranked.len());
        for (memory, score) in ranked {
            if diversity_cap > 0 {
                if let Some(file_path) = &memory.file_path {
                    let count = per_file.entry(file_path.clone()).or_insert(0);
                    if *count >= diversity_cap {
                        continue;
                    }
                    *count += 1;
                }
            }
            diversified.push((memory, score));
        }

        let mut buckets: HashMap<Category, Vec<RecalledMemory>> = HashMap::new();
        for (memory, score) in diversified {
            let bucket = buckets.entry(memory.category).or_default();
            if bucket.len() >= query.limit {
                continue;
            }
            bucket.push(to_recalled(&memory, score, query.condensed, false));
        }

        if self.project_path != GLOBAL_PROJECT_PATH {
            if let Some(global) = &self.global {
                let global_result = global.recall(query)?;
                merge_global_bucket(buckets.entry(Category::Decision).or_default(), global_result.decisions, query.limit);
                merge_global_bucket(buckets.entry(Category::Pattern).or_default(), global_result.patterns, query.limit);
                merge_global_bucket(buckets.entry(Category::Warning).or_default(), global_result.warnings, query.limit);
                merge_global_bucket(buckets.entry(Category::Learning).or_default(), global_result.learnings, query.limit);
            }
        }

        let decisions = buckets.remove(&Category::Decision).unwrap_or_default();
        let patterns = buckets.remove(&Category::Pattern).unwrap_or_default();
        let warnings = buckets.remove(&Category::Warning).unwrap_or_default();
        let learnings = buckets.remove(&Category::Learning).unwrap_or_default();
        let found = decisions.len() + patterns.len() + warnings.len() + learnings.len();

        let result = RecallResult { topic: query.topic.clone(), found, decisions, patterns, warnings, learnings };

        if let Ok(value) = serde_json::to_value(&result) {
            RECALL_CACHE.set(cache_key, value);
        }
        for id in result.ids().collect::<Vec<_>>() {
            let _ = self.store.bump_recall_count(id);
        }

        Ok(result)
    }

    /// Records an outcome (§4.G.4): atomically writes outcome+worked,
    /// re-indexes the updated text, and invalidates the recall cache. Never
    /// auto-creates a warning memory; only logs the suggestion.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the memory does not exist, otherwise
    /// `Error::Store` on a write failure.
    pub fn record_outcome(&self, memory_id: MemoryId, outcome: &str, worked: bool) -> Result<Memory> {
        let sealed = self.store.seal_outcome(memory_id, outcome, if worked { Worked::True } else { Worked::False })?;
        {
            let mut tfidf = self.tfidf.lock().map_err(|_| lock_poisoned())?;
            let text = format!("{} {}", sealed.content, sealed.rationale.as_deref().unwrap_or(""));
            tfidf.add_document(sealed.id, &text, &sealed.tags);
        }
        RECALL_CACHE.clear();
        self.sync_marker_after_local_write()?;
        if !worked {
            tracing::info!(memory_id, "outcome did not confirm the memory; caller may want a warning memory");
        }
        Ok(sealed)
    }

    /// Selects compaction candidates and delegates to [`graph::compact`],
    /// then patches the indices to match (§4.G.7).
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `summary` is too short, otherwise
    /// `Error::Store` on a write failure.
    pub fn compact(
        &self,
        summary: &str,
        candidate_ids: &[MemoryId],
        topic_filter: Option<&str>,
        limit: usize,
        dry_run: bool,
    ) -> Result<CompactionOutcome> {
        let candidates = if candidate_ids.is_empty() {
            let mut all = self.store.list_non_archived_memories()?;
            all.retain(|m| !m.pinned);
            if let Some(topic) = topic_filter {
                let wanted: HashSet<MemoryId> = {
                    let tfidf = self.tfidf.lock().map_err(|_| lock_poisoned())?;
                    tfidf
                        .search(topic, limit.max(all.len()), crate::index::tfidf::DEFAULT_THRESHOLD)
                        .into_iter()
                        .map(|(id, _)| id)
                        .collect()
                };
                all.retain(|m| wanted.contains(&m.id));
            }
            all.truncate(limit);
            all
        } else {
            let mut found = Vec::with_capacity(candidate_ids.len());
            for id in candidate_ids {
                if let Some(memory) = self.store.get_memory(*id)? {
                    if !memory.archived && !memory.pinned {
                        found.push(memory);
                    }
                }
            }
            found
        };

        let outcome = graph::compact(&self.store, summary, &candidates, dry_run)?;
        if let CompactionOutcome::Committed(ref result) = outcome {
            {
                let mut tfidf = self.tfidf.lock().map_err(|_| lock_poisoned())?;
                for id in &result.archived_ids {
                    tfidf.remove_document(*id);
                }
                if let Some(summary_memory) = self.store.get_memory(result.summary_id)? {
                    tfidf.add_document(result.summary_id, &summary_memory.content, &summary_memory.tags);
                }
            }
            {
                let mut vector = self.vector.lock().map_err(|_| lock_poisoned())?;
                for id in &result.archived_ids {
                    vector.delete(*id);
                }
            }
            RECALL_CACHE.clear();
            self.sync_marker_after_local_write()?;
        }
        Ok(outcome)
    }

    /// Read-only introspection over a session's pending decisions,
    /// classifying each as blocking once it has aged past
    /// `threshold_hours` (default from
    /// [`crate::config::DEFAULT_PENDING_DECISION_THRESHOLD_HOURS`]).
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a read failure.
    pub fn pending_decisions(
        &self,
        pending_ids: &[MemoryId],
        threshold_hours: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingDecision>> {
        let mut out = Vec::with_capacity(pending_ids.len());
        for id in pending_ids {
            if let Some(memory) = self.store.get_memory(*id)? {
                let age_hours = (now - memory.created_at).num_seconds() as f64 / 3600.0;
                out.push(PendingDecision {
                    memory_id: memory.id,
                    created_at: memory.created_at,
                    age_hours,
                    blocking: age_hours >= threshold_hours as f64,
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn manager() -> MemoryManager {
        MemoryManager::open_in_memory("/project", EngineConfig::default(), None).unwrap()
    }

    fn basic_input(content: &str) -> RememberInput {
        RememberInput {
            category: Category::Decision,
            content: content.to_string(),
            rationale: None,
            context: Json::Null,
            tags: vec![],
            file_path: None,
            file_path_relative: None,
            is_permanent_override: None,
        }
    }

    #[test]
    fn remember_rejects_empty_content() {
        let mgr = manager();
        assert!(mgr.remember(basic_input("   ")).is_err());
    }

    #[test]
    fn remember_then_recall_finds_it() {
        let mgr = manager();
        mgr.remember(basic_input("Use JSON Web Tokens for authentication")).unwrap();
        let result = mgr
            .recall(&RecallQuery {
                topic: "JSON Web Tokens".to_string(),
                categories: vec![],
                limit: 10,
                file_path: None,
                tags: vec![],
                condensed: false,
            })
            .unwrap();
        assert_eq!(result.found, 1);
        assert_eq!(result.decisions[0].content, "Use JSON Web Tokens for authentication");
    }

    #[test]
    fn archived_memories_never_reappear_in_recall() {
        let mgr = manager();
        let outcome = mgr.remember(basic_input("Use PostgreSQL for storage")).unwrap();
        mgr.store.archive_memory(outcome.memory.id).unwrap();
        let result = mgr
            .recall(&RecallQuery {
                topic: "PostgreSQL storage".to_string(),
                categories: vec![],
                limit: 10,
                file_path: None,
                tags: vec![],
                condensed: false,
            })
            .unwrap();
        assert_eq!(result.found, 0);
    }

    #[test]
    fn recall_limit_zero_yields_empty_buckets() {
        let mgr = manager();
        mgr.remember(basic_input("Use JSON Web Tokens for authentication")).unwrap();
        let result = mgr
            .recall(&RecallQuery {
                topic: "JSON Web Tokens".to_string(),
                categories: vec![],
                limit: 0,
                file_path: None,
                tags: vec![],
                condensed: false,
            })
            .unwrap();
        assert_eq!(result.found, 0);
    }

    #[test]
    fn condensed_recall_drops_rationale_and_context_and_truncates_content() {
        let mgr = manager();
        let phrase = "authentication token rotation needs review ";
        let padding = "filler ".repeat(30);
        let content = format!("{phrase}{padding}");
        let mut input = basic_input(&content);
        input.rationale = Some("because reasons".to_string());
        input.context = json!({"k": "v"});
        mgr.remember(input).unwrap();
        let result = mgr
            .recall(&RecallQuery {
                topic: "authentication token rotation".to_string(),
                categories: vec![],
                limit: 10,
                file_path: None,
                tags: vec![],
                condensed: true,
            })
            .unwrap();
        let recalled = &result.decisions[0];
        assert!(recalled.rationale.is_none());
        assert!(recalled.context.is_none());
        assert_eq!(recalled.content.len(), 153);
        let serialized = serde_json::to_value(recalled).unwrap();
        assert!(serialized.get("rationale").is_none());
        assert!(serialized.get("context").is_none());
    }

    #[test]
    fn warning_memories_are_always_included_when_a_category_filter_is_set() {
        let mgr = manager();
        let mut warning = basic_input("Never store secrets in plaintext logs");
        warning.category = Category::Warning;
        mgr.remember(warning).unwrap();
        let result = mgr
            .recall(&RecallQuery {
                topic: "logging secrets".to_string(),
                categories: vec![Category::Decision],
                limit: 10,
                file_path: None,
                tags: vec![],
                condensed: false,
            })
            .unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn pinned_memory_bypasses_decay() {
        let old = Utc::now() - chrono::Duration::days(120);
        let floor = DEFAULT_DECAY_MIN_FLOOR;
        assert!((decay_weight(old, Utc::now(), DEFAULT_DECAY_HALF_LIFE_DAYS, floor) - floor).abs() < 1e-6);
        assert!((decay_weight(old, Utc::now(), DEFAULT_DECAY_HALF_LIFE_DAYS, 1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn record_outcome_updates_worked_and_is_queryable() {
        let mgr = manager();
        let outcome = mgr.remember(basic_input("Use feature flags for rollout")).unwrap();
        let sealed = mgr.record_outcome(outcome.memory.id, "caused an incident", false).unwrap();
        assert_eq!(sealed.worked, Worked::False);
        assert_eq!(sealed.outcome.as_deref(), Some("caused an incident"));
    }

    #[test]
    fn similar_failed_memory_is_flagged_as_a_conflict() {
        let mgr = manager();
        let first = mgr.remember(basic_input("Use MongoDB for the primary datastore")).unwrap();
        mgr.record_outcome(first.memory.id, "caused data loss", false).unwrap();
        let second = mgr.remember(basic_input("Use MongoDB for the primary datastore again")).unwrap();
        assert!(second.conflicts.iter().any(|c| c.kind == ConflictKind::SimilarFailed));
    }

    #[test]
    fn near_duplicate_content_is_flagged() {
        let mgr = manager();
        mgr.remember(basic_input("Use exponential backoff when retrying failed HTTP requests")).unwrap();
        let second =
            mgr.remember(basic_input("Use exponential backoff when retrying failed HTTP requests")).unwrap();
        assert!(second.conflicts.iter().any(|c| c.kind == ConflictKind::PotentialDuplicate));
    }

    #[test]
    fn compact_with_short_summary_is_rejected_and_nothing_is_archived() {
        let mgr = manager();
        let outcome = mgr.remember(basic_input("Session 1: API patterns")).unwrap();
        assert!(mgr.compact("too short", &[], None, 10, false).is_err());
        assert!(!mgr.store.get_memory(outcome.memory.id).unwrap().unwrap().archived);
    }

    #[test]
    fn compact_archives_candidates_and_hides_them_from_recall() {
        let mgr = manager();
        let ids: Vec<MemoryId> = (0..5)
            .map(|i| mgr.remember(basic_input(&format!("Session {i}: API patterns {i}"))).unwrap().memory.id)
            .collect();
        let outcome = mgr
            .compact("Summary of API patterns across 5 sessions (long enough)", &ids, None, 10, false)
            .unwrap();
        let CompactionOutcome::Committed(result) = outcome else {
            unreachable!("dry_run was false, must commit");
        };
        assert_eq!(result.compacted_count, 5);

        let recall = mgr
            .recall(&RecallQuery {
                topic: "API patterns".to_string(),
                categories: vec![],
                limit: 10,
                file_path: None,
                tags: vec![],
                condensed: false,
            })
            .unwrap();
        let recalled_ids: Vec<MemoryId> =
            recall.decisions.iter().chain(&recall.patterns).chain(&recall.warnings).chain(&recall.learnings).map(|m| m.id).collect();
        for id in &ids {
            assert!(!recalled_ids.contains(id));
        }
        assert!(recalled_ids.contains(&result.summary_id));
    }

    #[test]
    fn classify_scope_file_anchored_is_always_local() {
        assert_eq!(
            classify_scope("Always validate input", None, &["security".to_string()], Some("/p/a.py"), "/p"),
            Scope::Local
        );
    }

    #[test]
    fn classify_scope_universal_practice_with_global_tag_is_global() {
        assert_eq!(
            classify_scope(
                "Always validate user input to prevent XSS",
                None,
                &["security".to_string(), "best-practice".to_string()],
                None,
                "/p"
            ),
            Scope::Global
        );
    }

    #[test]
    fn classify_scope_mixed_signals_default_to_local() {
        assert_eq!(
            classify_scope("Always validate user input", None, &["untagged".to_string()], None, "/p"),
            Scope::Local
        );
    }

    #[test]
    fn classify_scope_never_reclassifies_from_the_global_store() {
        assert_eq!(
            classify_scope(
                "Always validate user input to prevent XSS",
                None,
                &["security".to_string(), "best-practice".to_string()],
                None,
                GLOBAL_PROJECT_PATH
            ),
            Scope::Local
        );
    }

    #[test]
    fn remember_propagates_global_scope_to_the_attached_global_manager() {
        let global = Arc::new(MemoryManager::open_in_memory(GLOBAL_PROJECT_PATH, EngineConfig::default(), None).unwrap());
        let mut config = EngineConfig::default();
        config.global.write_enabled = true;
        let local = MemoryManager::open_in_memory("/p", config, None).unwrap().with_global(global.clone());

        let mut input = basic_input("Always validate user input to prevent XSS");
        input.category = Category::Pattern;
        input.tags = vec!["security".to_string(), "best-practice".to_string()];
        let outcome = local.remember(input).unwrap();

        assert_eq!(outcome.scope, Scope::Global);
        let global_result = global
            .recall(&RecallQuery {
                topic: "validate user input XSS".to_string(),
                categories: vec![],
                limit: 10,
                file_path: None,
                tags: vec![],
                condensed: false,
            })
            .unwrap();
        assert_eq!(global_result.found, 1);
    }

    #[test]
    fn pending_decisions_classifies_by_age() {
        let mgr = manager();
        let outcome = mgr.remember(basic_input("Pick a caching strategy")).unwrap();
        let pending = mgr.pending_decisions(&[outcome.memory.id], 24, Utc::now() + chrono::Duration::hours(25)).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].blocking);
    }
}
