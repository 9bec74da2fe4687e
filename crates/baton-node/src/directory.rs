use std::path::{Path, PathBuf};

use baton_trigger::{ObjectRecord, StaticDirectory};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read object directory {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse object directory {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Load a JSON array of [`ObjectRecord`]s, e.g.
///
/// ```json
/// [
///   { "id": "clock-hand", "linkedBody": "clock-body", "position": { "x": 1, "y": 2, "z": 0 } },
///   { "id": "clock-body", "animation": true }
/// ]
/// ```
pub fn load_directory(path: &Path) -> Result<StaticDirectory, DirectoryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| DirectoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let records: Vec<ObjectRecord> =
        serde_json::from_str(&raw).map_err(|source| DirectoryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(path = %path.display(), objects = records.len(), "object directory loaded");
    Ok(StaticDirectory::from_records(records))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use baton_trigger::{ObjectDirectory, ObjectId};

    use super::*;

    #[test]
    fn loads_records_with_either_link_spelling() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{ "id": "hand", "linkedBody": "body", "position": {{ "x": 1, "y": 2, "z": 3 }} }},
                {{ "id": "legacy", "clockBody": "body" }},
                {{ "id": "body", "animation": true }}
            ]"#
        )
        .unwrap();

        let dir = load_directory(file.path()).unwrap();
        assert_eq!(
            dir.linked_body(&ObjectId::from("hand")),
            Some(ObjectId::from("body"))
        );
        assert_eq!(
            dir.linked_body(&ObjectId::from("legacy")),
            Some(ObjectId::from("body"))
        );
        assert!(dir.has_animation(&ObjectId::from("body")));
        assert!(dir.position(&ObjectId::from("hand")).is_some());
    }

    #[test]
    fn reports_missing_and_malformed_files() {
        let missing = load_directory(Path::new("/nonexistent/objects.json"));
        assert!(matches!(missing, Err(DirectoryError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            load_directory(file.path()),
            Err(DirectoryError::Parse { .. })
        ));
    }
}
