use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Joins an uploaded file name onto `root`, refusing names that escape it.
///
/// Rejects empty names, absolute paths, `..` components and Windows
/// prefixes. `.` components are dropped from the result.
pub fn resolve_target_path(root: &Path, file_name: &str) -> Result<PathBuf, TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let mut resolved = root.to_path_buf();
    let mut pushed = false;

    for component in Path::new(file_name).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_name}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_name}"
                )));
            }
        }
    }

    if !pushed {
        return Err(TransferError::InvalidPath(format!(
            "no file name in: {file_name}"
        )));
    }
    Ok(resolved)
}
