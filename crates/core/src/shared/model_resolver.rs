use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file {0} does not exist")]
    Missing(PathBuf),
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Locates ONNX model files, downloading them into a cache directory on
/// first use.
pub struct ModelResolver {
    cache_dir: PathBuf,
}

impl ModelResolver {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Resolver rooted at the platform cache directory
    /// (`$XDG_CACHE_HOME/moodfeed/models` on Linux).
    pub fn with_default_cache() -> Result<Self, ModelResolveError> {
        default_cache_dir().map(Self::new)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolution order: explicit path (must exist), cached copy, download.
    pub fn resolve(
        &self,
        name: &str,
        url: &str,
        explicit: Option<&Path>,
    ) -> Result<PathBuf, ModelResolveError> {
        if let Some(path) = explicit {
            return if path.exists() {
                Ok(path.to_path_buf())
            } else {
                Err(ModelResolveError::Missing(path.to_path_buf()))
            };
        }

        let cached = self.cache_dir.join(name);
        if cached.exists() {
            log::debug!("Using cached model {}", cached.display());
            return Ok(cached);
        }

        fs::create_dir_all(&self.cache_dir).map_err(|source| ModelResolveError::CacheDir {
            path: self.cache_dir.clone(),
            source,
        })?;
        log::info!("Downloading {name} from {url}");
        download(url, &cached)?;
        Ok(cached)
    }
}

pub fn default_cache_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join("moodfeed").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

/// Downloads to `<dest>.part` and renames, so a failed download never leaves
/// a truncated model behind.
fn download(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let download_err = |source| ModelResolveError::Download {
        url: url.to_string(),
        source,
    };
    let bytes = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(download_err)?;

    let part = dest.with_extension("part");
    let write_err = |source| ModelResolveError::Write {
        path: part.clone(),
        source,
    };
    let mut file = fs::File::create(&part).map_err(write_err)?;
    file.write_all(&bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(&part, dest).map_err(|source| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source,
    })?;
    log::info!("Saved {} ({} bytes)", dest.display(), bytes.len());
    Ok(())
}
