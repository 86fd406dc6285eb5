use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::content::ContentBuffer;
use crate::protocol::{OnExist, ResponseCode};
use crate::request::{check_on_exist, PathLocks};
use crate::session::ResourceSession;
use crate::{AppError, AppResult};

const MERGE_READ_SIZE: usize = 256 * 1024;

/// Index parsed from the `.split<N>` suffix of `name`.
pub fn split_index(name: &str) -> Option<usize> {
    let (_, suffix) = name.rsplit_once(".split")?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Orders split names by their numeric suffix. Names without one, names
/// that are not plain file names and duplicate indices are refused.
pub fn order_splits(names: &[String]) -> AppResult<Vec<String>> {
    if names.is_empty() {
        return Err(AppError::response(
            ResponseCode::BadRequest,
            "merge lists no split resources",
        ));
    }
    let mut seen = HashSet::with_capacity(names.len());
    let mut indexed = Vec::with_capacity(names.len());
    for name in names {
        if name.contains('/') || name.contains('\\') || name == ".." || name == "." {
            return Err(AppError::response(
                ResponseCode::BadRequest,
                format!("split resource {} is not a file name", name),
            ));
        }
        let index = split_index(name).ok_or_else(|| {
            AppError::response(
                ResponseCode::BadRequest,
                format!("{} carries no split suffix", name),
            )
        })?;
        if !seen.insert(index) {
            return Err(AppError::response(
                ResponseCode::BadRequest,
                format!("split index {} listed twice", index),
            ));
        }
        indexed.push((index, name.clone()));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, name)| name).collect())
}

/// Concatenates `splits`, already ordered, into `destination` while holding
/// the destination's lock. The merged bytes are staged next to the
/// destination and moved into place at the end, so a failed merge leaves
/// the destination untouched. Each split is handed over by the session and
/// deleted afterwards. Returns the merged length.
pub async fn merge_splits(
    destination: &Path,
    splits: &[PathBuf],
    on_exist: OnExist,
    locks: &PathLocks,
    session: &ResourceSession,
) -> AppResult<u64> {
    merge_locked(destination, splits, on_exist, locks, session)
        .await
        .map_err(|e| match e.response_code() {
            ResponseCode::AlreadyExist | ResponseCode::BadRequest => e,
            _ => AppError::response(
                ResponseCode::MergeFailed,
                format!("merge into {} failed: {}", destination.display(), e.reason()),
            ),
        })
}

async fn merge_locked(
    destination: &Path,
    splits: &[PathBuf],
    on_exist: OnExist,
    locks: &PathLocks,
    session: &ResourceSession,
) -> AppResult<u64> {
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    locks.create_dir_all(dir).await?;
    let _guard = locks.lock(destination).await;
    let append = check_on_exist(destination, on_exist).await?;
    session.ensure_active()?;

    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut merged = ContentBuffer::temp(dir, name, None);
    for split in splits {
        let mut part = ContentBuffer::adopt(split).await?;
        while let Some(chunk) = part.read_chunk(MERGE_READ_SIZE).await? {
            merged.append(&chunk, false).await?;
        }
    }
    merged.append(&[], true).await?;

    let length = if append {
        merged.append_into(destination).await?;
        merged.delete().await?;
        fs::metadata(destination).await?.len()
    } else {
        merged.rename_to(destination).await?;
        merged.len()
    };

    for split in splits {
        session.completed(split);
        if let Err(e) = fs::remove_file(split).await {
            warn!("merged split {} could not be removed: {}", split.display(), e);
        }
    }
    debug!(
        "merged {} split(s) into {} ({} bytes)",
        splits.len(),
        destination.display(),
        length
    );
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    #[case("big.bin.ab.split0", Some(0))]
    #[case("big.bin.ab.split12", Some(12))]
    #[case("big.bin", None)]
    #[case("big.split", None)]
    #[case("big.split1x", None)]
    fn test_split_index(#[case] name: &str, #[case] expected: Option<usize>) {
        assert_eq!(split_index(name), expected);
    }

    #[test]
    fn test_order_follows_suffix_not_position() -> AppResult<()> {
        let names: Vec<String> = ["f.t.split10", "f.t.split2", "f.t.split0", "f.t.split1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            order_splits(&names)?,
            vec!["f.t.split0", "f.t.split1", "f.t.split2", "f.t.split10"]
        );

        let duplicate = vec!["a.split1".to_string(), "b.split1".to_string()];
        assert_eq!(
            order_splits(&duplicate).unwrap_err().response_code(),
            ResponseCode::BadRequest
        );
        let escaping = vec!["../x.split0".to_string()];
        assert!(order_splits(&escaping).is_err());
        assert!(order_splits(&[]).is_err());
        Ok(())
    }

    fn write_splits(dir: &Path, session: &ResourceSession) -> AppResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for (i, part) in ["hello ", "split ", "world"].iter().enumerate() {
            let path = dir.join(format!("out.txt.t.split{}", i));
            std::fs::write(&path, part)?;
            session.processing(&path)?;
            paths.push(path);
        }
        Ok(paths)
    }

    #[tokio::test]
    async fn test_merge_hands_splits_over() -> AppResult<()> {
        let dir = tempdir()?;
        let session = ResourceSession::new("s1");
        let splits = write_splits(dir.path(), &session)?;
        let destination = dir.path().join("out.txt");

        let length = merge_splits(
            &destination,
            &splits,
            OnExist::Fail,
            &PathLocks::new(),
            &session,
        )
        .await?;
        assert_eq!(length, 17);
        assert_eq!(std::fs::read_to_string(&destination)?, "hello split world");
        assert!(session.tracked().is_empty());
        assert!(splits.iter().all(|split| !split.exists()));
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_appends_and_refuses_existing() -> AppResult<()> {
        let dir = tempdir()?;
        let destination = dir.path().join("out.txt");
        std::fs::write(&destination, ">> ")?;
        let session = ResourceSession::new("s2");
        let splits = write_splits(dir.path(), &session)?;

        let err = merge_splits(&destination, &splits, OnExist::Fail, &PathLocks::new(), &session)
            .await
            .unwrap_err();
        assert_eq!(err.response_code(), ResponseCode::AlreadyExist);
        assert_eq!(session.tracked().len(), 3);

        merge_splits(&destination, &splits, OnExist::Append, &PathLocks::new(), &session).await?;
        assert_eq!(std::fs::read_to_string(&destination)?, ">> hello split world");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_split_fails_without_touching_destination() -> AppResult<()> {
        let dir = tempdir()?;
        let session = ResourceSession::new("s3");
        let mut splits = write_splits(dir.path(), &session)?;
        splits.push(dir.path().join("out.txt.t.split3"));
        let destination = dir.path().join("out.txt");

        let err = merge_splits(&destination, &splits, OnExist::Overwrite, &PathLocks::new(), &session)
            .await
            .unwrap_err();
        assert_eq!(err.response_code(), ResponseCode::MergeFailed);
        assert!(!destination.exists());
        Ok(())
    }
}
