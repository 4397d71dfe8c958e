//! Init-Script Materializer
//!
//! Writes caller-supplied init scripts into the project's
//! `.gradle/ideaInitScripts` directory so the build tool can load them by
//! path. A script whose content already sits in a candidate file is reused;
//! otherwise the first free name in `name.gradle`, `name-1.gradle`,
//! `name-2.gradle`, ... is created.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory, relative to the project, holding materialized scripts.
pub const INIT_SCRIPTS_DIR: &str = ".gradle/ideaInitScripts";

pub const INIT_SCRIPT_EXTENSION: &str = "gradle";

/// A resolved init script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitScriptFile {
    pub path: PathBuf,
    /// `false` when an existing file with identical content was reused.
    pub created: bool,
}

pub fn init_scripts_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(INIT_SCRIPTS_DIR)
}

/// Resolve `content` to a file under `base_dir`, writing it only if no
/// candidate already holds exactly these bytes.
pub fn materialize(base_dir: &Path, name: &str, content: &str) -> io::Result<InitScriptFile> {
    let base_dir = absolute(base_dir)?;
    fs::create_dir_all(&base_dir)?;

    let bytes = content.as_bytes();
    let mut suffix: u64 = 0;
    loop {
        let candidate = base_dir.join(candidate_name(name, suffix));
        match fs::symlink_metadata(&candidate) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => match create_new(&candidate, bytes) {
                Ok(()) => return Ok(resolved(name, bytes, candidate, true)),
                // Someone created it between the probe and the write: probe it again.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
            Ok(meta) => {
                if meta.is_file()
                    && meta.len() == bytes.len() as u64
                    && fs::read(&candidate)? == bytes
                {
                    return Ok(resolved(name, bytes, candidate, false));
                }
            }
        }
        suffix += 1;
    }
}

/// Materialize every script in `scripts` under the project's init-script
/// directory. An empty map touches nothing.
pub fn materialize_all(
    project_dir: &Path,
    scripts: &BTreeMap<String, String>,
) -> io::Result<Vec<InitScriptFile>> {
    if scripts.is_empty() {
        return Ok(Vec::new());
    }

    let dir = init_scripts_dir(project_dir);
    scripts
        .iter()
        .map(|(name, content)| materialize(&dir, name, content))
        .collect()
}

/// `--init-script <path>` pairs, in order.
pub fn init_script_arguments(files: &[InitScriptFile]) -> Vec<String> {
    files
        .iter()
        .flat_map(|file| {
            [
                "--init-script".to_string(),
                file.path.to_string_lossy().into_owned(),
            ]
        })
        .collect()
}

fn candidate_name(name: &str, suffix: u64) -> String {
    if suffix == 0 {
        format!("{}.{}", name, INIT_SCRIPT_EXTENSION)
    } else {
        format!("{}-{}.{}", name, suffix, INIT_SCRIPT_EXTENSION)
    }
}

fn create_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn resolved(name: &str, bytes: &[u8], path: PathBuf, created: bool) -> InitScriptFile {
    debug!(
        name,
        sha256 = %hex::encode(Sha256::digest(bytes)),
        path = %path.display(),
        created,
        "resolved init script"
    );
    InitScriptFile { path, created }
}
