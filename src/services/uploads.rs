use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::Id;
use crate::error::{BazaarError, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Public URL prefix under which the upload root is served.
pub const PUBLIC_PREFIX: &str = "/images";

/// A file received from a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Lowercased extension with its dot, when it is an allowed image type.
pub fn image_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let ext = format!(".{}", ext);
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

#[derive(Debug, Clone)]
pub struct Uploads {
    root: PathBuf,
}

impl Uploads {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects the whole batch if any file is not an allowed image.
    pub fn check_images(&self, uploads: &[Upload]) -> Result<()> {
        for upload in uploads {
            if image_extension(&upload.file_name).is_none() {
                return Err(BazaarError::invalid(format!(
                    "{} is not an allowed image type ({})",
                    upload.file_name,
                    IMAGE_EXTENSIONS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Stores a product image as `/images/products/{uuid}{ext}`.
    pub async fn save_product_image(&self, upload: &Upload) -> Result<String> {
        let ext = image_extension(&upload.file_name)
            .ok_or_else(|| BazaarError::invalid(format!("{} is not an allowed image type", upload.file_name)))?;
        self.write("products", &format!("{}{}", Uuid::new_v4(), ext), &upload.bytes).await
    }

    /// Stores a profile picture as `/images/profiles/{user_id}_{uuid}{ext}`.
    pub async fn save_profile_picture(&self, user_id: Id, upload: &Upload) -> Result<String> {
        let ext = image_extension(&upload.file_name)
            .ok_or_else(|| BazaarError::invalid(format!("{} is not an allowed image type", upload.file_name)))?;
        self.write("profiles", &format!("{}_{}{}", user_id, Uuid::new_v4(), ext), &upload.bytes).await
    }

    async fn write(&self, folder: &str, name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), bytes).await?;
        debug!(folder, name, size = bytes.len(), "Stored upload");
        Ok(format!("{}/{}/{}", PUBLIC_PREFIX, folder, name))
    }

    /// Maps a public URL back to a file under the root. Refuses anything that
    /// would leave the root.
    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(PUBLIC_PREFIX)?.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == ".." || part.is_empty()) {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Best-effort removal; a missing file is not an error.
    pub async fn remove(&self, url: &str) {
        let Some(path) = self.path_for(url) else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove upload"),
        }
    }
}
