//! Card directory loader
//!
//! Layout: one sub-directory per vendor, each holding `*.json` card files.
//! Anything else is reported and skipped. Entries are visited in sorted
//! order so the catalog order does not depend on the filesystem.

use super::{CardCatalog, CardSpec, DeviceCard};
use crate::error::CatalogError;
use std::fs;
use std::path::{Path, PathBuf};

/// Load every card below `dir` into a catalog
pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<CardCatalog, CatalogError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        log::warn!("No directory with cards found at {}", dir.display());
        return Err(CatalogError::NoDirectory(dir.to_path_buf()));
    }

    let mut cards = Vec::new();
    for entry in sorted_entries(dir)? {
        if entry.is_dir() {
            load_vendor_dir(&entry, &mut cards)?;
        } else {
            log::warn!(
                "File {} found in undesirable directory {}",
                file_name(&entry),
                dir.display()
            );
        }
    }

    if cards.is_empty() {
        log::error!("No device cards retrieved from {}", dir.display());
        return Err(CatalogError::NoCards(dir.display().to_string()));
    }

    log::info!("Loaded {} device cards from {}", cards.len(), dir.display());
    CardCatalog::from_cards(cards)
}

fn load_vendor_dir(dir: &Path, cards: &mut Vec<DeviceCard>) -> Result<(), CatalogError> {
    let vendor = file_name(dir);

    for path in sorted_entries(dir)? {
        if path.is_dir() {
            log::warn!(
                "Directory {} found in undesirable directory {}",
                file_name(&path),
                dir.display()
            );
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            log::warn!(
                "File {} with undesirable extension found in directory {}",
                file_name(&path),
                dir.display()
            );
            continue;
        }

        let text = fs::read_to_string(&path).map_err(|source| CatalogError::Read {
            path: path.clone(),
            source,
        })?;
        let spec: CardSpec = match serde_json::from_str(&text) {
            Ok(spec) => spec,
            Err(e) => {
                log::error!("JSON file {} is corrupted: {}", path.display(), e);
                continue;
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let card = DeviceCard::from_spec(format!("{}/{}", vendor, stem), spec)?;
        log::debug!("Loaded card {} ({})", card.name(), card.info_pattern());
        cards.push(card);
    }

    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let read_err = |source| CatalogError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
