use std::path::Path;

pub(crate) fn load_binary(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|err| format!("failed to read {:?}: {}", path, err))
}
