//! Build+cache OCI images from a local directory: a content-addressed
//! `qs/<name>:<digest[:12]>` tag, skip-if-cached, atomic index rewrite.
//! Grounded in `quixand/core/templates.py::Templates`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::{QuixandError, Result};
use crate::state_store::atomic_write_json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub image: String,
    pub digest: String,
}

pub struct Templates {
    config: Config,
}

impl Templates {
    pub fn new(config: Config) -> Self {
        Templates { config }
    }

    /// Builds (or reuses) an image tagged from the content hash of
    /// `dir`'s files plus `build_args`. Looks for `e2b.Dockerfile` before
    /// falling back to `Dockerfile`, matching the original's alternate
    /// filename support.
    pub fn build(
        &self,
        dir: &Path,
        name: Option<&str>,
        build_args: &HashMap<String, String>,
    ) -> Result<String> {
        if !dir.exists() {
            return Err(QuixandError::TemplateError(format!(
                "template directory {} does not exist",
                dir.display()
            )));
        }

        let dockerfile = {
            let e2b = dir.join("e2b.Dockerfile");
            if e2b.exists() {
                e2b
            } else {
                let plain = dir.join("Dockerfile");
                if !plain.exists() {
                    return Err(QuixandError::TemplateError(
                        "no e2b.Dockerfile or Dockerfile found".to_string(),
                    ));
                }
                plain
            }
        };

        let template_name = name
            .map(str::to_string)
            .unwrap_or_else(|| dir_basename(dir));

        let mut digest = hash_dir(dir)?;
        if !build_args.is_empty() {
            let mut args: Vec<_> = build_args.iter().collect();
            args.sort_by(|a, b| a.0.cmp(b.0));
            let args_json = serde_json::to_string(&args)?;
            let mut hasher = Sha256::new();
            hasher.update(digest.as_bytes());
            hasher.update(args_json.as_bytes());
            digest = hex::encode(hasher.finalize());
        }

        let image = format!("qs/{template_name}:{}", &digest[..12.min(digest.len())]);

        if self.image_exists(&image)? {
            log::info!("using cached template image {image}");
            self.update_index(&template_name, &image, &digest)?;
            return Ok(image);
        }

        log::info!("building template image {image}");
        self.run_build(&dockerfile, &image, dir, build_args)?;
        self.update_index(&template_name, &image, &digest)?;
        Ok(image)
    }

    pub fn ls(&self) -> Result<HashMap<String, TemplateEntry>> {
        Ok(self.load_index())
    }

    pub fn rm(&self, name: &str) -> Result<()> {
        let mut index = self.load_index();
        index.remove(name);
        atomic_write_json(&self.index_path(), &index)
    }

    fn run_build(
        &self,
        dockerfile: &Path,
        image: &str,
        context: &Path,
        build_args: &HashMap<String, String>,
    ) -> Result<()> {
        let mut cmd = std::process::Command::new(&self.config.runtime);
        cmd.arg("build")
            .arg("-f")
            .arg(dockerfile)
            .arg("-t")
            .arg(image);
        for (k, v) in build_args {
            cmd.arg("--build-arg").arg(format!("{k}={v}"));
        }
        cmd.arg(context);

        let status = cmd
            .status()
            .map_err(|e| QuixandError::TemplateError(format!("failed to invoke build: {e}")))?;
        if !status.success() {
            return Err(QuixandError::TemplateError(format!(
                "build failed with status {status}"
            )));
        }
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let output = std::process::Command::new(&self.config.runtime)
            .args(["images", "-q", image])
            .output()
            .map_err(|e| QuixandError::TemplateError(format!("failed to query images: {e}")))?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn index_path(&self) -> PathBuf {
        self.config.template_index_file()
    }

    fn load_index(&self) -> HashMap<String, TemplateEntry> {
        std::fs::read_to_string(self.index_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn update_index(&self, name: &str, image: &str, digest: &str) -> Result<()> {
        let mut index = self.load_index();
        index.insert(
            name.to_string(),
            TemplateEntry {
                image: image.to_string(),
                digest: digest.to_string(),
            },
        );
        atomic_write_json(&self.index_path(), &index)
    }
}

fn dir_basename(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template".to_string())
}

/// Hashes every file under `dir` in sorted path order, skipping anything
/// under a `.git*`-prefixed entry, matching `templates.py::_hash_dir`.
fn hash_dir(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for file in files {
        let bytes = std::fs::read(&file)?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(".git") {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(root: &Path) -> Config {
        Config {
            adapter: "local-docker".to_string(),
            timeout_seconds: 300,
            image: "python:3.11-slim".to_string(),
            runtime: "docker".to_string(),
            root: root.to_path_buf(),
            metadata: serde_json::Value::Null,
            disable_watchdog: true,
        }
    }

    #[test]
    fn hash_dir_is_stable_across_traversal_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let h1 = hash_dir(dir.path()).unwrap();
        let h2 = hash_dir(dir.path()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_dir_ignores_git_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let without_git = hash_dir(dir.path()).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("HEAD"), b"ref: refs/heads/main").unwrap();
        let with_git = hash_dir(dir.path()).unwrap();
        assert_eq!(without_git, with_git);
    }

    #[test]
    fn ls_on_fresh_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let templates = Templates::new(config_for(dir.path()));
        assert!(templates.ls().unwrap().is_empty());
    }

    #[test]
    fn rm_on_unknown_name_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let templates = Templates::new(config_for(dir.path()));
        templates.rm("does-not-exist").unwrap();
    }
}
