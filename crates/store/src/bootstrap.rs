//! Catalog bootstrap.
//!
//! Walks the ROM directory, fingerprints every file whose extension is on the
//! allow-list, resolves display names from the optional `gamelist.xml`
//! document at the root (`gamelist.json` when no XML document exists) and
//! builds a [`Catalog`]. The walk and the hashing
//! are blocking work and run on the blocking thread pool via
//! [`load_catalog`].

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use romstore_core::{Catalog, CatalogEntry, ContentHasher};
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::BootstrapError;

/// EmulationStation metadata document looked up at the catalog root.
pub const GAMELIST_XML: &str = "gamelist.xml";

/// JSON rendition of the same list, read when no XML document exists.
pub const GAMELIST_JSON: &str = "gamelist.json";

/// Extensions accepted when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["gb", "gbc", "nes"];

const HASH_CHUNK: usize = 8192;

/// Inputs to a catalog build.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub rom_dir: PathBuf,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
    /// Basename of the resource given rank 0.
    pub default_name: String,
}

impl BootstrapConfig {
    pub fn new(rom_dir: impl Into<PathBuf>, default_name: impl Into<String>) -> Self {
        Self {
            rom_dir: rom_dir.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            default_name: default_name.into(),
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Lowercased extension of `path` if it is on the allow-list.
    fn accepted_system(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extensions.contains(&ext).then_some(ext)
    }
}

// ============================================================================
// Metadata Document
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
struct GameListEntry {
    #[serde(default)]
    path: String,
    #[serde(default)]
    name: String,
}

/// `<gameList><game><path/><name/>...</game>...</gameList>`
#[derive(Debug, Default, Deserialize)]
struct XmlGameList {
    #[serde(rename = "game", default)]
    games: Vec<GameListEntry>,
}

/// Display names from the metadata document.
#[derive(Debug, Clone, Default)]
struct GameList {
    entries: Vec<GameListEntry>,
}

fn read_optional(path: &Path) -> Result<Option<String>, BootstrapError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BootstrapError::MetadataIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl GameList {
    /// Read the document at the catalog root. A missing file is an empty list.
    fn read(rom_dir: &Path) -> Result<Self, BootstrapError> {
        let xml_path = rom_dir.join(GAMELIST_XML);
        if let Some(text) = read_optional(&xml_path)? {
            let doc: XmlGameList = quick_xml::de::from_str(&text)
                .map_err(|source| BootstrapError::MetadataXml { path: xml_path, source })?;
            return Ok(Self { entries: doc.games });
        }

        let json_path = rom_dir.join(GAMELIST_JSON);
        if let Some(text) = read_optional(&json_path)? {
            let entries: Vec<GameListEntry> = serde_json::from_str(&text)
                .map_err(|source| BootstrapError::Metadata { path: json_path, source })?;
            return Ok(Self { entries });
        }

        debug!(target: "romstore.bootstrap", rom_dir = %rom_dir.display(), "no metadata document");
        Ok(Self::default())
    }

    /// Name of the first entry whose path mentions `basename`.
    fn display_name(&self, basename: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| {
                let path = e.path.trim();
                !path.is_empty() && path.contains(basename)
            })
            .map(|e| e.name.trim())
            .filter(|name| !name.is_empty())
    }
}

// ============================================================================
// Scan
// ============================================================================

fn fingerprint_file(path: &Path) -> io::Result<romstore_core::Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Walk the ROM directory and fingerprint every accepted file.
///
/// Blocking. Files whose name starts with `.` are skipped; directories are
/// descended regardless of name. Unreadable entries below the root are
/// logged and skipped; an unreadable root is an error.
pub fn scan(config: &BootstrapConfig) -> Result<Vec<CatalogEntry>, BootstrapError> {
    let gamelist = GameList::read(&config.rom_dir)?;
    let mut entries = Vec::new();

    let walker = WalkDir::new(&config.rom_dir)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(BootstrapError::RomDir {
                    path: config.rom_dir.clone(),
                    source: err,
                });
            }
            Err(err) => {
                warn!(target: "romstore.bootstrap", error = %err, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file()
            || entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
        {
            continue;
        }
        let path = entry.path();
        let Some(system) = config.accepted_system(path) else {
            continue;
        };
        let Some(basename) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!(target: "romstore.bootstrap", path = %path.display(), "skipping non UTF-8 file name");
            continue;
        };

        let fingerprint = match fingerprint_file(path) {
            Ok(fp) => fp,
            Err(err) => {
                warn!(target: "romstore.bootstrap", path = %path.display(), error = %err, "skipping unreadable ROM");
                continue;
            }
        };

        let display_name = gamelist
            .display_name(basename)
            .unwrap_or(basename)
            .to_string();

        debug!(
            target: "romstore.bootstrap",
            path = %path.display(),
            fingerprint = %fingerprint,
            "fingerprinted"
        );

        entries.push(CatalogEntry {
            fingerprint,
            basename: basename.to_string(),
            display_name,
            system,
            source: entry.into_path(),
        });
    }

    Ok(entries)
}

/// Build the catalog off the async runtime and log the result.
pub async fn load_catalog(config: BootstrapConfig) -> Result<Catalog, BootstrapError> {
    let default_name = config.default_name.clone();
    let entries = tokio::task::spawn_blocking(move || scan(&config)).await??;
    let catalog = Catalog::load(entries, &default_name)?;

    for path in catalog.collapsed_sources() {
        info!(target: "romstore.bootstrap", path = %path.display(), "duplicate content collapsed");
    }
    for resource in catalog.resources() {
        info!(
            target: "romstore.bootstrap",
            rank = resource.rank(),
            fingerprint = %resource.fingerprint(),
            name = resource.display_name(),
            system = resource.system(),
            "catalog entry"
        );
    }
    match catalog.default_resource() {
        Some(resource) => info!(
            target: "romstore.bootstrap",
            fingerprint = %resource.fingerprint(),
            "default resource"
        ),
        None => warn!(target: "romstore.bootstrap", name = %default_name, "no resource matches the default name"),
    }

    Ok(catalog)
}
