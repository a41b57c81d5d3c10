use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value_as_non_empty_string;

/// Reference data describing one vendor algorithm version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmInfo {
    pub version_id: String,
    pub tech_name: Option<String>,
    pub family_name: Option<String>,
}

impl AlgorithmInfo {
    /// Reads one dictionary row. Accepts `family_name`, `algorithm_family.name`
    /// or `family.name` for the family, and numeric or string ids.
    pub fn from_value(row: &Value) -> Option<Self> {
        let obj = row.as_object()?;
        let version_id = match obj.get("id").or_else(|| obj.get("algorithm_version_id"))? {
            Value::String(id) if !id.trim().is_empty() => id.trim().to_string(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        let tech_name = value_as_non_empty_string(obj.get("tech_name"))
            .or_else(|| value_as_non_empty_string(obj.get("name")));
        let family_name = value_as_non_empty_string(obj.get("family_name")).or_else(|| {
            ["algorithm_family", "family"].iter().find_map(|key| {
                obj.get(*key)
                    .and_then(Value::as_object)
                    .and_then(|family| {
                        value_as_non_empty_string(family.get("name"))
                            .or_else(|| value_as_non_empty_string(family.get("tech_name")))
                    })
            })
        });
        Some(Self {
            version_id,
            tech_name,
            family_name,
        })
    }

    /// Reads a dictionary payload: either a bare array or `{ "results": [...] }`.
    pub fn list_from_payload(payload: &Value) -> Vec<Self> {
        let rows = match payload {
            Value::Array(rows) => rows.as_slice(),
            Value::Object(obj) => obj
                .get("results")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };
        rows.iter().filter_map(Self::from_value).collect()
    }
}

/// Where the algorithm dictionary comes from. The engine implements this over
/// HTTP; tests hand in a fixed list.
pub trait AlgorithmSource: Send + Sync {
    fn fetch(&self) -> anyhow::Result<Vec<AlgorithmInfo>>;
}

/// Source that always returns the same entries.
#[derive(Debug, Clone, Default)]
pub struct StaticAlgorithmSource {
    entries: Vec<AlgorithmInfo>,
}

impl StaticAlgorithmSource {
    pub fn new(entries: Vec<AlgorithmInfo>) -> Self {
        Self { entries }
    }
}

impl AlgorithmSource for StaticAlgorithmSource {
    fn fetch(&self) -> anyhow::Result<Vec<AlgorithmInfo>> {
        Ok(self.entries.clone())
    }
}

type AlgorithmTable = BTreeMap<String, AlgorithmInfo>;

/// Immutable view of the dictionary taken once per normalization, so every
/// row of one payload resolves against the same table.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmSnapshot {
    table: Arc<AlgorithmTable>,
}

impl AlgorithmSnapshot {
    pub fn get(&self, version_id: &str) -> Option<&AlgorithmInfo> {
        self.table.get(version_id)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Lazily-populated read-through cache over an [`AlgorithmSource`].
///
/// The first lookup fetches; later lookups are served from memory. The fetch
/// runs outside the lock, so two threads racing on first use may both fetch;
/// the first result stored wins. A failed fetch is not cached: the caller gets
/// an empty snapshot and the next [`snapshot`](Self::snapshot) tries again.
pub struct AlgorithmDictionary {
    source: Box<dyn AlgorithmSource>,
    table: RwLock<Option<Arc<AlgorithmTable>>>,
}

impl AlgorithmDictionary {
    pub fn new<S: AlgorithmSource + 'static>(source: S) -> Self {
        Self {
            source: Box::new(source),
            table: RwLock::new(None),
        }
    }

    /// Dictionary that never resolves anything.
    pub fn empty() -> Self {
        Self::new(StaticAlgorithmSource::default())
    }

    pub fn lookup(&self, version_id: &str) -> Option<AlgorithmInfo> {
        self.snapshot().get(version_id).cloned()
    }

    /// Current table, fetching it first if nothing is cached yet. At most one
    /// fetch per call.
    pub fn snapshot(&self) -> AlgorithmSnapshot {
        AlgorithmSnapshot {
            table: self.table(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.table
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn table(&self) -> Arc<AlgorithmTable> {
        if let Ok(guard) = self.table.read() {
            if let Some(table) = guard.as_ref() {
                return Arc::clone(table);
            }
        }

        let fetched = match self.source.fetch() {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| (entry.version_id.clone(), entry))
                .collect::<AlgorithmTable>(),
            Err(err) => {
                tracing::warn!("algorithm dictionary fetch failed: {err:#}");
                return Arc::new(AlgorithmTable::new());
            }
        };

        match self.table.write() {
            Ok(mut guard) => Arc::clone(guard.get_or_insert_with(|| Arc::new(fetched))),
            Err(_) => Arc::new(fetched),
        }
    }
}

impl std::fmt::Debug for AlgorithmDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmDictionary")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
