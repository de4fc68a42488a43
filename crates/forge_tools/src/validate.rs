//! Content catalog validation.

use std::path::{Path, PathBuf};

use forge_core::content::ContentCatalog;
use forge_core::error::{GameError, Result};
use serde::Serialize;
use tracing::{debug, info};

/// What a valid catalog contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogReport {
    /// File checked.
    pub path: PathBuf,
    /// Item count.
    pub items: usize,
    /// Liquid count.
    pub liquids: usize,
    /// Unit type count.
    pub units: usize,
    /// Block count, floors and air included.
    pub blocks: usize,
    /// Spawn group count.
    pub spawn_groups: usize,
}

/// Load and validate one catalog file.
///
/// Loading runs every catalog check: name uniqueness, resource limits,
/// and references from blocks and spawn groups.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_catalog(path: &Path) -> Result<CatalogReport> {
    let catalog = ContentCatalog::load(path)?;
    let report = CatalogReport {
        path: path.to_path_buf(),
        items: catalog.items().len(),
        liquids: catalog.liquids().len(),
        units: catalog.units().len(),
        blocks: catalog.blocks().len(),
        spawn_groups: catalog.spawn_groups().len(),
    };
    debug!(?report, "Catalog valid");
    Ok(report)
}

/// Validate a catalog file, or every `.ron` file in a directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed, holds no RON
/// files, or any catalog fails validation.
pub fn validate_path(path: &Path) -> Result<Vec<CatalogReport>> {
    if !path.is_dir() {
        return Ok(vec![validate_catalog(path)?]);
    }

    let mut files = std::fs::read_dir(path)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    files.retain(|file| file.extension().is_some_and(|ext| ext == "ron"));
    files.sort();
    if files.is_empty() {
        return Err(GameError::DataParseError {
            path: path.display().to_string(),
            message: "no .ron files found".into(),
        });
    }

    let reports = files
        .iter()
        .map(|file| validate_catalog(file))
        .collect::<Result<Vec<_>>>()?;
    info!(files = reports.len(), "All catalogs valid");
    Ok(reports)
}
