//! Proof file naming

use std::path::{Path, PathBuf};

/// `<document><suffix>`, appended to the full path string
pub fn proof_path_for(document: &Path, suffix: &str) -> PathBuf {
    let mut name = document.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Strip `suffix` from a proof path to find the document it covers.
///
/// `None` if the path does not end in `suffix`, nothing precedes it, or the
/// path is not valid UTF-8.
pub fn document_path_for(proof: &Path, suffix: &str) -> Option<PathBuf> {
    let stripped = proof.to_str()?.strip_suffix(suffix)?;
    if stripped.is_empty() || stripped.ends_with(std::path::MAIN_SEPARATOR) {
        return None;
    }
    Some(PathBuf::from(stripped))
}
