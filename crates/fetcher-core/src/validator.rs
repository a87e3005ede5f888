//! Safetensors header check.
//!
//! Layout:
//! - bytes 0..8: header length (u64, little-endian)
//! - bytes 8..8+len: UTF-8 JSON object describing the tensors

use crate::config::HashConfig;
use crate::error::{FetcherError, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Read and parse the JSON header of a safetensors file.
pub fn read_safetensors_header(path: impl AsRef<Path>) -> Result<serde_json::Value> {
    let path = path.as_ref();
    let invalid = |message: String| FetcherError::InvalidModelFile {
        path: path.to_path_buf(),
        message,
    };

    let mut file = File::open(path).map_err(|e| FetcherError::io_with_path(e, path))?;

    let mut size_buf = [0u8; 8];
    file.read_exact(&mut size_buf)
        .map_err(|e| invalid(format!("cannot read header length: {}", e)))?;
    let header_size = u64::from_le_bytes(size_buf);

    if header_size > HashConfig::MAX_SAFETENSORS_HEADER {
        return Err(invalid(format!("header length {} too large", header_size)));
    }

    let mut header_buf = vec![0u8; header_size as usize];
    file.read_exact(&mut header_buf)
        .map_err(|e| invalid(format!("truncated header: {}", e)))?;

    let header_str =
        std::str::from_utf8(&header_buf).map_err(|e| invalid(format!("header is not UTF-8: {}", e)))?;

    let header: serde_json::Value = serde_json::from_str(header_str)
        .map_err(|e| invalid(format!("header is not JSON: {}", e)))?;

    if !header.is_object() {
        return Err(invalid("header is not a JSON object".to_string()));
    }

    Ok(header)
}

/// Whether the file carries a readable safetensors header.
pub fn can_read_safetensors_header(path: impl AsRef<Path>) -> bool {
    match read_safetensors_header(path.as_ref()) {
        Ok(_) => true,
        Err(e) => {
            debug!("{}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn safetensors_bytes(header: &[u8]) -> Vec<u8> {
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn test_valid_header() {
        let file = file_with(&safetensors_bytes(
            br#"{"w":{"dtype":"F16","shape":[2,2],"data_offsets":[0,8]}}"#,
        ));
        assert!(can_read_safetensors_header(file.path()));

        let header = read_safetensors_header(file.path()).unwrap();
        assert!(header.get("w").is_some());
    }

    #[test]
    fn test_invalid_utf8() {
        let file = file_with(&safetensors_bytes(&[0xff, 0xfe, 0xfd]));
        assert!(!can_read_safetensors_header(file.path()));
    }

    #[test]
    fn test_not_json() {
        let file = file_with(&safetensors_bytes(b"not json"));
        assert!(!can_read_safetensors_header(file.path()));
    }

    #[test]
    fn test_too_short() {
        let file = file_with(&[1, 2, 3]);
        assert!(!can_read_safetensors_header(file.path()));
    }

    #[test]
    fn test_oversized_length() {
        let file = file_with(&u64::MAX.to_le_bytes());
        let err = read_safetensors_header(file.path()).unwrap_err();
        assert!(matches!(err, FetcherError::InvalidModelFile { .. }));
    }

    #[test]
    fn test_missing_file() {
        assert!(!can_read_safetensors_header("/nonexistent/model.safetensors"));
    }
}
