use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::Error;

use url::Url;

// Photo formats the messaging provider accepts as MMS media.
const PHOTO_EXTENSIONS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("png", "image/png"),
    ("bmp", "image/bmp"),
];

/// A file that exists, is not a directory and has a supported photo extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendableFile {
    path: PathBuf,
    name: String,
    content_type: &'static str,
}

impl SendableFile {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::FileDoesNotExist(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        if metadata.is_dir() {
            return Err(Error::FileIsDirectory(path.to_path_buf()));
        }

        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| {
                PHOTO_EXTENSIONS
                    .iter()
                    .find(|(known, _)| known.eq_ignore_ascii_case(ext))
            })
            .map(|(_, content_type)| *content_type)
            .ok_or_else(|| Error::FiletypeNotSupported(path.to_path_buf()))?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::FiletypeNotSupported(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            content_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Where the file can be fetched once `base_url` tunnels to the file server.
    pub fn public_url(&self, base_url: &str) -> Result<Url, Error> {
        let mut url = Url::parse(base_url)?;
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("`{base_url}` cannot be used as a base url")))?
            .pop_if_empty()
            .push("file")
            .push(&self.name);
        Ok(url)
    }
}
