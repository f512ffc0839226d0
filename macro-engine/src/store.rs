//! Persistence of named macros.

use crate::{Macro, StoreError};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Persists and retrieves macros by name
pub trait MacroStore: Send + Sync {
    /// Store `macro_` under `name`, replacing any previous macro with that name.
    /// The stored macro carries `name` regardless of the name it was built with.
    fn save(&self, name: &str, macro_: &Macro) -> Result<(), StoreError>;

    fn load(&self, name: &str) -> Result<Macro, StoreError>;

    /// The macro stored under `name`, or `None` when it is missing or unreadable
    fn get(&self, name: &str) -> Option<Macro> {
        match self.load(name) {
            Ok(m) => Some(m),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => {
                warn!(name, "Failed to load macro: {}", e);
                None
            }
        }
    }

    /// Remove the macro; deleting a missing name is `NotFound`
    fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Names of all stored macros, sorted
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

fn check_name(name: &str) -> Result<&str, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

/// Keeps macros in memory only
#[derive(Debug, Default)]
pub struct MemoryMacroStore {
    macros: RwLock<HashMap<String, Macro>>,
}

impl MemoryMacroStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MacroStore for MemoryMacroStore {
    fn save(&self, name: &str, macro_: &Macro) -> Result<(), StoreError> {
        let name = check_name(name)?;
        self.macros
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), macro_.renamed(name));
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Macro, StoreError> {
        let name = check_name(name)?;
        self.macros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let name = check_name(name)?;
        self.macros
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .macros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}

/// One JSON document per macro in a directory
#[derive(Debug, Clone)]
pub struct FileMacroStore {
    dir: PathBuf,
}

impl FileMacroStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened macro store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `name`
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let name = check_name(name)?;
        Ok(self.dir.join(format!("{}.json", file_stem(name))))
    }

    fn read(&self, path: &Path, name: &str) -> Result<Macro, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Macro::from_json_bytes(&bytes).map_err(|source| StoreError::Decode {
            name: name.to_string(),
            source,
        })
    }

    /// Read the document at `path` and require that it belongs to `name`.
    /// Case-insensitive file systems can map two names onto one file.
    fn read_owned(&self, path: &Path, name: &str) -> Result<Macro, StoreError> {
        let m = self.read(path, name)?;
        if m.name() != name {
            return Err(StoreError::NameConflict {
                name: name.to_string(),
                existing: m.name().to_string(),
            });
        }
        Ok(m)
    }
}

/// Map a macro name to a portable file stem.
///
/// Reserved characters, `%` and a leading dot are percent-encoded, so distinct
/// names always get distinct stems.
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' => {
                stem.push_str(&format!("%{:02X}", c as u32))
            }
            '.' if i == 0 => stem.push_str("%2E"),
            c => stem.push(c),
        }
    }
    stem
}

impl MacroStore for FileMacroStore {
    fn save(&self, name: &str, macro_: &Macro) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let name = check_name(name)?;
        // Never overwrite another macro's document; unreadable ones may be replaced
        match self.read_owned(&path, name) {
            Ok(_) | Err(StoreError::NotFound(_)) | Err(StoreError::Decode { .. }) => {}
            Err(e) => return Err(e),
        }
        let named = macro_.renamed(name);
        let bytes = named.to_json_bytes().map_err(std::io::Error::from)?;

        // Write next to the target, then rename over it
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        info!(name = named.name(), path = %path.display(), events = named.len(), "Macro saved");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Macro, StoreError> {
        let path = self.path_for(name)?;
        self.read_owned(&path, check_name(name)?)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let name = check_name(name)?;
        match self.read_owned(&path, name) {
            Ok(_) | Err(StoreError::Decode { .. }) => {}
            Err(e) => return Err(e),
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(name, "Macro deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            // The name inside the document is authoritative
            match self.read(&path, &stem) {
                Ok(m) => names.push(m.name().to_string()),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable macro: {}", e),
            }
        }
        names.sort();
        Ok(names)
    }
}
