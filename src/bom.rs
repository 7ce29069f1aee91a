//! Bill-of-materials catalog.
//!
//! The catalog decides which tracker class labels are countable parts. It is
//! loaded from a TOML file and can be reloaded while the counter runs; every
//! clone of a `PartCatalog` shares the same underlying table.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Debug, Deserialize, Default)]
struct BomFile {
    #[serde(default)]
    parts: Vec<BomPartFile>,
}

#[derive(Debug, Deserialize)]
struct BomPartFile {
    number: String,
    #[serde(default)]
    name: Option<String>,
    classes: Vec<String>,
}

/// Part metadata attached to one or more tracker class labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartInfo {
    pub number: String,
    pub name: String,
}

/// Class labels must be plain identifiers, not free text.
///
/// Allowed: "bracket_OK", "housing-v2_NOK", "M6.bolt"
pub fn validate_class_label(label: &str) -> Result<()> {
    static CLASS_LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CLASS_LABEL_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("class label pattern compiles")
    });
    if !re.is_match(label) {
        return Err(anyhow!(
            "bom: class label '{}' must match ^[A-Za-z0-9_.-]{{1,64}}$",
            label
        ));
    }
    Ok(())
}

/// Shared, reloadable lookup of countable class labels.
#[derive(Clone, Debug, Default)]
pub struct PartCatalog {
    classes: Arc<RwLock<HashMap<String, PartInfo>>>,
    source: Option<PathBuf>,
}

impl PartCatalog {
    /// Catalog with no eligible classes. Nothing is counted until a BOM is loaded.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let classes = read_bom(path)?;
        log::info!(
            "PartCatalog: loaded {} class labels from {}",
            classes.len(),
            path.display()
        );
        Ok(Self {
            classes: Arc::new(RwLock::new(classes)),
            source: Some(path.to_path_buf()),
        })
    }

    pub fn from_parts<I>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (PartInfo, Vec<String>)>,
    {
        let mut classes = HashMap::new();
        for (info, labels) in parts {
            insert_part(&mut classes, info, labels)?;
        }
        Ok(Self {
            classes: Arc::new(RwLock::new(classes)),
            source: None,
        })
    }

    /// Re-reads the BOM file and swaps the table for every clone of this catalog.
    ///
    /// A failed reload leaves the current table in place.
    pub fn reload(&self) -> Result<usize> {
        let path = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("bom: catalog was not loaded from a file"))?;
        let fresh = read_bom(path)?;
        let count = fresh.len();
        let mut guard = self
            .classes
            .write()
            .map_err(|_| anyhow!("bom: catalog lock poisoned"))?;
        *guard = fresh;
        log::info!(
            "PartCatalog: reloaded {} class labels from {}",
            count,
            path.display()
        );
        Ok(count)
    }

    pub fn is_eligible(&self, class_name: &str) -> bool {
        match self.classes.read() {
            Ok(guard) => guard.contains_key(class_name),
            Err(_) => false,
        }
    }

    pub fn part_for(&self, class_name: &str) -> Option<PartInfo> {
        self.classes.read().ok()?.get(class_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.classes.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

fn read_bom(path: &Path) -> Result<HashMap<String, PartInfo>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bom file {}", path.display()))?;
    let file: BomFile = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid bom file {}: {}", path.display(), e))?;
    let mut classes = HashMap::new();
    for part in file.parts {
        let info = PartInfo {
            name: part.name.unwrap_or_else(|| part.number.clone()),
            number: part.number,
        };
        insert_part(&mut classes, info, part.classes)?;
    }
    Ok(classes)
}

fn insert_part(
    classes: &mut HashMap<String, PartInfo>,
    info: PartInfo,
    labels: Vec<String>,
) -> Result<()> {
    if info.number.trim().is_empty() {
        return Err(anyhow!("bom: part number must not be empty"));
    }
    for label in labels {
        validate_class_label(&label)?;
        if let Some(existing) = classes.get(&label) {
            if existing.number != info.number {
                return Err(anyhow!(
                    "bom: class label '{}' mapped to both {} and {}",
                    label,
                    existing.number,
                    info.number
                ));
            }
        }
        classes.insert(label, info.clone());
    }
    Ok(())
}
