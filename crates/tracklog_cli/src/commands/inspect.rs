//! Inspect command implementation.

use super::{format_millis, CliError, CliResult, Format};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use tracklog_storage::{FileBackend, KeyValueBackend};

/// Data directory inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Number of stored documents.
    pub document_count: usize,
    /// Total size of stored values in bytes.
    pub total_size: usize,
    /// Document count per kind (`workouts`, `settings`).
    pub kinds: BTreeMap<String, usize>,
    /// Per-document details, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<DocumentInfo>>,
}

/// Metadata of a single stored document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    /// Storage key.
    pub key: String,
    /// Current version.
    pub version: String,
    /// Unix milliseconds of the last write.
    pub last_modified: u64,
    /// Value size in bytes.
    pub size: usize,
    /// Decoded contents, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Runs the inspect command.
///
/// With `user`, only that user's documents are listed and their contents
/// are included.
pub fn run(
    path: &Path,
    user: Option<&str>,
    show_documents: bool,
    format: Format,
) -> CliResult<InspectResult> {
    if !path.is_dir() {
        return Err(CliError::MissingDataDir(path.display().to_string()));
    }
    let user = user.map(tracklog_core::UserId::parse).transpose()?;
    debug!(path = %path.display(), "opening data directory");
    let backend = FileBackend::open(path)?;

    let mut result = InspectResult {
        path: path.display().to_string(),
        document_count: 0,
        total_size: 0,
        kinds: BTreeMap::new(),
        documents: (show_documents || user.is_some()).then(Vec::new),
    };

    for key in backend.keys("")? {
        let (kind, owner) = key.split_once('/').unwrap_or((key.as_str(), ""));
        if user.as_ref().is_some_and(|u| u.as_str() != owner) {
            continue;
        }
        let Some(stored) = backend.get(&key)? else {
            // Deleted between listing and reading.
            continue;
        };

        result.document_count += 1;
        result.total_size += stored.value.len();
        *result.kinds.entry(kind.to_string()).or_default() += 1;

        if let Some(documents) = result.documents.as_mut() {
            let content = if user.is_some() {
                Some(serde_json::from_slice(&stored.value)?)
            } else {
                None
            };
            documents.push(DocumentInfo {
                version: stored.version.to_string(),
                last_modified: stored.last_modified,
                size: stored.value.len(),
                content,
                key,
            });
        }
    }

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Data directory: {}", result.path);
    println!("Documents:      {}", result.document_count);
    println!("Total size:     {} bytes", result.total_size);
    for (kind, count) in &result.kinds {
        println!("  {kind:<12} {count}");
    }

    if let Some(documents) = &result.documents {
        println!();
        for doc in documents {
            println!(
                "{}  version={}  modified={}  {} bytes",
                doc.key,
                doc.version,
                format_millis(doc.last_modified),
                doc.size
            );
            if let Some(content) = &doc.content {
                println!("{content:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracklog_core::{ActivityLog, Settings, UserId, VersionedStore, Workout};

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("absent"), None, false, Format::Text).unwrap_err();
        assert!(matches!(err, CliError::MissingDataDir(_)));
    }

    #[test]
    fn counts_documents_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::new(Arc::new(FileBackend::open(dir.path()).unwrap()));
        let alice = UserId::parse("u_alice").unwrap();
        let bob = UserId::parse("u_bob").unwrap();

        let log = ActivityLog::from_workouts(vec![Workout::new(
            "2024-02-02".parse().unwrap(),
            "row",
            25,
        )]);
        store.write_if_version(&alice, log, None).unwrap();
        store.write_if_version(&alice, Settings::default(), None).unwrap();
        store.write_if_version(&bob, Settings::default(), None).unwrap();

        let all = run(dir.path(), None, false, Format::Json).unwrap();
        assert_eq!(all.document_count, 3);
        assert_eq!(all.kinds["settings"], 2);
        assert!(all.documents.is_none());

        let mine = run(dir.path(), Some("u_alice"), false, Format::Text).unwrap();
        assert_eq!(mine.document_count, 2);
        let documents = mine.documents.unwrap();
        let workouts = documents.iter().find(|d| d.key == "workouts/u_alice").unwrap();
        assert_eq!(
            workouts.content.as_ref().unwrap()["totals"]["durationMinutes"],
            25
        );
    }
}
