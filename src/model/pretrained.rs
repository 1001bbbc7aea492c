//! Pretrained backbone weights
//!
//! A weight reference is either a local file or an `http(s)` URL. URLs are
//! downloaded once into a cache directory and reused on later runs.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::utils::error::{LesionError, Result};

const DEFAULT_FILE_NAME: &str = "backbone.mpk";

pub fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Last path segment of a URL, without query or fragment
pub fn cache_file_name(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .unwrap_or(DEFAULT_FILE_NAME)
        .to_string()
}

/// Local path of the weights behind `reference`, downloading if needed
pub fn resolve_weights(reference: &str, cache_dir: &Path) -> Result<PathBuf> {
    if !is_url(reference) {
        let path = PathBuf::from(reference);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(LesionError::PathNotFound(path))
        };
    }

    let target = cache_dir.join(cache_file_name(reference));
    if target.is_file() {
        debug!("Using cached weights {:?}", target);
        return Ok(target);
    }

    fs::create_dir_all(cache_dir)?;
    info!("Downloading pretrained weights from {}", reference);

    let response = reqwest::blocking::get(reference)?.error_for_status()?;
    let bytes = response.bytes()?;

    // Write to a temporary name so an interrupted download is not mistaken for a cached file
    let partial = target.with_extension("part");
    let mut file = File::create(&partial)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&partial, &target)?;

    info!("Saved {} bytes to {:?}", bytes.len(), target);
    Ok(target)
}
