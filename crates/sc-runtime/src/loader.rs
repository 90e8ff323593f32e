//! Script discovery, loading and hot reload.
//!
//! A script is a TOML manifest under the scripts directory. Its name is the
//! path relative to that directory without the extension, using forward
//! slashes (`tools/cleanup`). The manifest's `module` key selects a
//! registered [`crate::ScriptRegistry`] module (default: the flattened
//! script name); the entry function is resolved inside that module by naming
//! convention.
//!
//! Entry function resolution (first match wins):
//! 1) `chain`
//! 2) `main`
//! 3) `<basename>`
//! 4) `<basename>_chain`
//! 5) `<flattened_path>`
//! 6) `<flattened_path>_chain`
//!
//! Examples:
//! - `scripts/cleanup.toml`       -> `chain()`, `main()`, `cleanup()`, `cleanup_chain()`
//! - `scripts/tools/cleanup.toml` -> additionally `tools_cleanup()`, `tools_cleanup_chain()`
//!
//! Every load instantiates a fresh module from the registry, so a reload
//! never shares state with the previous version; the prior instance is
//! dropped from the loader's table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::registry::{EntryFn, ScriptRegistry};
use crate::{Result, ScriptError};

const SCRIPT_EXTENSION: &str = "toml";

#[derive(Debug, Default, Deserialize)]
struct ScriptManifest {
    /// Registered module to instantiate; defaults to the flattened script name.
    module: Option<String>,
}

/// One loaded script: manifest path, resolved entry and reload bookkeeping.
pub struct ScriptInfo {
    pub name: String,
    pub path: PathBuf,
    pub module: String,
    /// Unique per-load tag (flattened name + mtime), useful in logs when the
    /// same script is reloaded repeatedly.
    pub module_tag: String,
    pub entry_name: String,
    pub entry: EntryFn,
    pub last_modified: SystemTime,
}

/// Loads scripts from a directory, resolves entry functions and supports
/// mtime-based hot reload.
pub struct ScriptLoader {
    scripts_dir: PathBuf,
    registry: Arc<ScriptRegistry>,
    scripts: HashMap<String, ScriptInfo>,
}

impl ScriptLoader {
    /// Create a loader and preload every discoverable script (failures are
    /// logged, not fatal).
    pub fn new(scripts_dir: impl Into<PathBuf>, registry: Arc<ScriptRegistry>) -> Self {
        let scripts_dir = scripts_dir.into();
        if let Err(err) = std::fs::create_dir_all(&scripts_dir) {
            warn!(dir = %scripts_dir.display(), %err, "could not create scripts dir");
        }

        let mut loader = Self {
            scripts_dir,
            registry,
            scripts: HashMap::new(),
        };
        loader.load_all();
        loader
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    // ------------------------------------------------------------------ discovery

    /// Script names relative to the scripts dir, without extension, sorted.
    /// Path segments starting with `_` are skipped.
    pub fn list_available_scripts(&self) -> Vec<String> {
        let mut scripts = Vec::new();

        for entry in WalkDir::new(&self.scripts_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.scripts_dir) else {
                continue;
            };
            if rel
                .components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('_'))
            {
                continue;
            }

            let name = rel
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            scripts.push(name);
        }

        scripts.sort();
        scripts
    }

    // ------------------------------------------------------------------ load / reload

    /// Load all discoverable scripts; returns the successfully loaded names.
    pub fn load_all(&mut self) -> Vec<String> {
        let mut loaded = Vec::new();
        for name in self.list_available_scripts() {
            match self.load_script(&name, true) {
                Ok(_) => loaded.push(name),
                Err(err) => error!(script = %name, %err, "preload failed"),
            }
        }
        info!(loaded = loaded.len(), "script preload completed");
        loaded
    }

    /// Load or reload one script by name. Without `force`, a fresh cached
    /// entry is reused.
    pub fn load_script(&mut self, script_name: &str, force: bool) -> Result<EntryFn> {
        let path = self.scripts_dir.join(format!("{script_name}.{SCRIPT_EXTENSION}"));
        if !path.is_file() {
            return Err(ScriptError::NotFound { path });
        }

        let mtime = modified_time(&path)?;

        if !force {
            if let Some(info) = self.scripts.get(script_name) {
                if mtime <= info.last_modified {
                    return Ok(info.entry.clone());
                }
            }
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ScriptError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: ScriptManifest =
            toml::from_str(&raw).map_err(|source| ScriptError::Manifest {
                path: path.clone(),
                source,
            })?;

        let flat = flatten(script_name);
        let module_name = manifest.module.unwrap_or_else(|| flat.clone());

        let module =
            self.registry
                .instantiate(&module_name)
                .ok_or_else(|| ScriptError::UnknownModule {
                    script: script_name.to_string(),
                    module: module_name.clone(),
                })?;

        let candidates = entry_candidates(script_name);
        let (entry_name, entry) = candidates
            .iter()
            .find_map(|name| module.get(name).map(|f| (name.clone(), f)))
            .ok_or_else(|| ScriptError::NoEntryFunction {
                script: script_name.to_string(),
                candidates: candidates.clone(),
            })?;

        let module_tag = format!("{}_{}", flat, mtime_tag(mtime));

        // Replacing the table entry drops the previous module instance.
        self.scripts.insert(
            script_name.to_string(),
            ScriptInfo {
                name: script_name.to_string(),
                path,
                module: module_name,
                module_tag: module_tag.clone(),
                entry_name,
                entry: entry.clone(),
                last_modified: mtime,
            },
        );

        debug!(script = script_name, module = %module_tag, "script loaded");
        Ok(entry)
    }

    /// Entry function of an already loaded script.
    pub fn loaded_entry(&self, script_name: &str) -> Option<EntryFn> {
        self.scripts.get(script_name).map(|info| info.entry.clone())
    }

    pub fn script_info(&self, script_name: &str) -> Option<&ScriptInfo> {
        self.scripts.get(script_name)
    }

    // ------------------------------------------------------------------ hot reload

    /// Reload every loaded script whose file mtime advanced; unload scripts
    /// whose file disappeared. Returns the reloaded names.
    pub fn check_for_updates(&mut self) -> Vec<String> {
        let mut reloaded = Vec::new();

        let known: Vec<(String, PathBuf, SystemTime)> = self
            .scripts
            .values()
            .map(|info| (info.name.clone(), info.path.clone(), info.last_modified))
            .collect();

        for (name, path, last_modified) in known {
            if !path.is_file() {
                warn!(script = %name, "script removed from disk, unloading");
                self.unload_script(&name);
                continue;
            }

            let Ok(mtime) = modified_time(&path) else {
                continue;
            };
            if mtime > last_modified {
                match self.load_script(&name, true) {
                    Ok(_) => reloaded.push(name),
                    Err(err) => error!(script = %name, %err, "hot reload failed"),
                }
            }
        }

        if !reloaded.is_empty() {
            info!(?reloaded, "hot reload applied");
        }
        reloaded
    }

    /// Force reload all currently loaded scripts; returns the names that
    /// reloaded successfully.
    pub fn reload_all(&mut self) -> Vec<String> {
        let names: Vec<String> = self.scripts.keys().cloned().collect();
        let mut reloaded = Vec::new();
        for name in names {
            if self.load_script(&name, true).is_ok() {
                reloaded.push(name);
            }
        }
        reloaded
    }

    /// Drop a script from the table.
    pub fn unload_script(&mut self, script_name: &str) {
        if let Some(info) = self.scripts.remove(script_name) {
            info!(script = script_name, module = %info.module_tag, "script unloaded");
        }
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    path.metadata()
        .and_then(|m| m.modified())
        .map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn mtime_tag(mtime: SystemTime) -> u128 {
    mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

fn flatten(script_name: &str) -> String {
    script_name
        .trim_matches('/')
        .replace(['/', '-', '.'], "_")
}

fn entry_candidates(script_name: &str) -> Vec<String> {
    let trimmed = script_name.trim_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed).to_string();
    let flat = flatten(script_name);

    let mut candidates = vec![
        "chain".to_string(),
        "main".to_string(),
        base.clone(),
        format!("{base}_chain"),
    ];
    if flat != base {
        candidates.push(flat.clone());
        candidates.push(format!("{flat}_chain"));
    }
    candidates
}
