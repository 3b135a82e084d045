//! Model cache, downloads, and session loading.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use ort::session::Session;

use crate::error::{Error, Result};

const SD15_REPO: &str = "https://huggingface.co/modularai/stable-diffusion-1.5-onnx/resolve/main";

/// Stable Diffusion 1.5 components fetched into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    VaeEncoder,
    VaeDecoder,
    /// Noise predictor; its weights live in a separate data file.
    Unet,
}

impl ModelType {
    /// Directory of this component in the export repository.
    const fn component(self) -> &'static str {
        match self {
            Self::VaeEncoder => "vae_encoder",
            Self::VaeDecoder => "vae_decoder",
            Self::Unet => "unet",
        }
    }

    /// Cached file name.
    #[must_use]
    pub const fn filename(self) -> &'static str {
        match self {
            Self::VaeEncoder => "vae_encoder.onnx",
            Self::VaeDecoder => "vae_decoder.onnx",
            Self::Unet => "unet.onnx",
        }
    }

    #[must_use]
    pub fn url(self) -> String {
        format!("{SD15_REPO}/{}/model.onnx", self.component())
    }

    /// Fallback size for the progress bar when the server sends no length.
    #[must_use]
    pub const fn approx_size(self) -> u64 {
        match self {
            Self::VaeEncoder => 140_000_000,
            Self::VaeDecoder => 100_000_000,
            Self::Unet => 1_300_000,
        }
    }

    /// External weights file as `(url, file name, approximate size)`.
    ///
    /// The file name must match the reference inside the ONNX graph.
    #[must_use]
    pub fn external_data(self) -> Option<(String, &'static str, u64)> {
        match self {
            Self::VaeEncoder | Self::VaeDecoder => None,
            Self::Unet => Some((
                format!("{SD15_REPO}/unet/model.onnx_data"),
                "model.onnx_data",
                3_500_000_000,
            )),
        }
    }
}

/// Directory holding downloaded models.
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Cache under the platform cache directory, e.g. `~/.cache/regionbatch/models`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new() -> Result<Self> {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_dir(base.join("regionbatch").join("models"))
    }

    /// Cache in an explicit directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;
        Ok(Self { cache_dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path to a model file, downloading it and its weights if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded.
    pub fn get_model_path(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.cache_dir.join(model_type.filename());
        if !path.exists() {
            download_file(
                &model_type.url(),
                &path,
                model_type.filename(),
                model_type.approx_size(),
            )?;
        }

        if let Some((url, name, size)) = model_type.external_data() {
            let data_path = self.cache_dir.join(name);
            if !data_path.exists() {
                download_file(&url, &data_path, name, size)?;
            }
        }

        Ok(path)
    }

    /// Load a cached model, downloading it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be fetched or loaded.
    pub fn load_session(&self, model_type: ModelType) -> Result<Session> {
        load_session(&self.get_model_path(model_type)?)
    }
}

/// Load an ONNX model from a local file.
///
/// # Errors
///
/// Returns an error if the file is not a loadable model.
pub fn load_session(path: &Path) -> Result<Session> {
    let name = path.display().to_string();
    tracing::debug!("Loading ONNX model {name}");

    Session::builder()
        .map_err(|source| Error::ModelLoad {
            name: name.clone(),
            source,
        })?
        .commit_from_file(path)
        .map_err(|source| Error::ModelLoad { name, source })
}

/// Download `url` to `path` with a progress bar, via a temporary file.
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let response = reqwest::blocking::Client::new()
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let pb = ProgressBar::new(response.content_length().unwrap_or(approx_size));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    io::copy(&mut pb.wrap_read(response), &mut file)?;
    pb.finish_with_message(format!("Downloaded {name}"));

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_point_at_components() {
        assert!(ModelType::VaeDecoder.url().ends_with("/vae_decoder/model.onnx"));
        assert!(ModelType::VaeEncoder.external_data().is_none());
        let (url, name, _) = ModelType::Unet.external_data().unwrap();
        assert!(url.ends_with("/unet/model.onnx_data"));
        assert_eq!(name, "model.onnx_data");
    }

    #[test]
    fn test_cached_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::with_dir(dir.path().join("models")).unwrap();
        fs::write(cache.dir().join("vae_decoder.onnx"), b"stub").unwrap();

        let path = cache.get_model_path(ModelType::VaeDecoder).unwrap();
        assert_eq!(path, cache.dir().join("vae_decoder.onnx"));
    }
}
