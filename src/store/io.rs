use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::utils::write_atomic;

/// Outcome of reading a JSON document from disk.
pub enum JsonRead<T> {
    Missing,
    Parsed(T),
    Invalid(serde_json::Error),
}

pub async fn read_json_file<T>(path: &Path) -> std::io::Result<JsonRead<T>>
where
    T: DeserializeOwned,
{
    match fs::read(path).await {
        Ok(bytes) => {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                Ok(JsonRead::Missing)
            } else {
                match serde_json::from_slice::<T>(&bytes) {
                    Ok(value) => Ok(JsonRead::Parsed(value)),
                    Err(err) => Ok(JsonRead::Invalid(err)),
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(JsonRead::Missing),
        Err(err) => Err(err),
    }
}

/// Atomically write json to disk using a temp file + rename.
///
/// The write is fsync'd to ensure durability.
pub async fn write_json_file<T>(path: &Path, value: &T) -> Result<(), crate::error::StoreError>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json).await?;
    Ok(())
}
