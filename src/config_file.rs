//! Generic config file loader

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Like `json5::from_str`, but with the error location in the
/// message.
fn json5_from_str<T: DeserializeOwned>(s: &str) -> Result<T> {
    json5::from_str(s).map_err(|e| match e {
        json5::Error::Message {
            msg,
            location: Some(json5::Location { line, column }),
        } => anyhow!("{msg} at line:column {line}:{column}"),
        json5::Error::Message {
            msg,
            location: None,
        } => anyhow!("{msg}"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigBackend {
    Json5,
    Yaml,
}

impl ConfigBackend {
    pub fn load_config_file<T: DeserializeOwned>(self, path: &Path) -> Result<T> {
        let s = std::fs::read_to_string(path)
            .with_context(|| anyhow!("loading config file from {path:?}"))?;
        self.parse_config(&s)
            .with_context(|| anyhow!("decoding config file {path:?}"))
    }

    pub fn parse_config<T: DeserializeOwned>(self, s: &str) -> Result<T> {
        match self {
            ConfigBackend::Json5 => json5_from_str(s),
            ConfigBackend::Yaml => Ok(serde_yml::from_str(s)?),
        }
    }

    pub fn save_config_file<T: Serialize>(self, path: &Path, value: &T) -> Result<()> {
        let s = match self {
            // JSON is valid JSON5
            ConfigBackend::Json5 => serde_json::to_string_pretty(value)
                .with_context(|| anyhow!("encoding config as JSON5"))?,
            ConfigBackend::Yaml => {
                serde_yml::to_string(value).with_context(|| anyhow!("encoding config as YAML"))?
            }
        };
        std::fs::write(path, s).with_context(|| anyhow!("writing config file to {path:?}"))
    }
}

pub const FILE_EXTENSIONS: &[(&str, ConfigBackend)] = &[
    ("json5", ConfigBackend::Json5),
    ("json", ConfigBackend::Json5),
    ("yml", ConfigBackend::Yaml),
    ("yaml", ConfigBackend::Yaml),
];

pub fn backend_from_path(path: &Path) -> Result<ConfigBackend> {
    let Some(ext) = path.extension() else {
        bail!(
            "given file path does not have an extension \
             for determining the file type: {path:?}"
        )
    };
    let Some(ext) = ext.to_str() else {
        bail!("given file path does have an extension that is not unicode: {path:?}")
    };
    if let Some((_, backend)) = FILE_EXTENSIONS.iter().find(|(e, _b)| *e == ext) {
        Ok(*backend)
    } else {
        bail!("given file path does have an unknown extension {ext:?}: {path:?}")
    }
}

fn add_extension(path: &Path, extension: &str) -> Option<PathBuf> {
    let file_name = path.file_name()?;
    let mut file_name = OsString::from(file_name);
    file_name.push(".");
    file_name.push(extension);
    Some(path.with_file_name(file_name))
}

pub fn save_config_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let backend = backend_from_path(path)?;
    backend.save_config_file(path, value)
}

pub trait LoadConfigFile: DeserializeOwned + Default {
    /// The extensions from `FILE_EXTENSIONS` are appended to this
    /// path and tried.
    fn default_config_path_without_suffix() -> Result<Option<PathBuf>>;

    /// If `path` is given, the file must exist or an error is
    /// returned. Otherwise, the default location is checked
    /// (`default_config_path_without_suffix`): if exactly one file
    /// with a fitting extension exists there, it is loaded, if none
    /// exists, the `Default` value is returned.
    fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        if let Some(path) = path {
            let path = path.as_ref();
            let backend = backend_from_path(path)?;
            return backend.load_config_file(path);
        }
        let Some(path) = Self::default_config_path_without_suffix()? else {
            return Ok(Self::default());
        };
        let path_and_backends: Vec<(PathBuf, ConfigBackend)> = FILE_EXTENSIONS
            .iter()
            .map(|(extension, backend)| {
                let path = add_extension(&path, extension)
                    .ok_or_else(|| anyhow!("path is missing a file name: {path:?}"))?;
                Ok(path.exists().then_some((path, *backend)))
            })
            .filter_map(|x| x.transpose())
            .collect::<Result<_>>()?;
        match path_and_backends.as_slice() {
            [] => Ok(Self::default()),
            [(path, backend)] => backend.load_config_file(path),
            _ => {
                let paths: Vec<_> = path_and_backends.iter().map(|(path, _)| path).collect();
                bail!("multiple config file paths found, leading to ambiguity: {paths:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_backend_from_path() -> Result<()> {
        assert_eq!(backend_from_path(Path::new("a/b.json5"))?, ConfigBackend::Json5);
        assert_eq!(backend_from_path(Path::new("b.yaml"))?, ConfigBackend::Yaml);
        assert!(backend_from_path(Path::new("b.toml")).is_err());
        assert!(backend_from_path(Path::new("b")).is_err());
        Ok(())
    }

    #[test]
    fn t_json5_error_location() {
        let e = ConfigBackend::Json5
            .parse_config::<serde_json::Value>("{ a: 1,\n b: }")
            .unwrap_err();
        let s = e.to_string();
        assert!(s.contains("line:column"), "{s}");
    }

    #[test]
    fn t_add_extension() {
        assert_eq!(
            add_extension(Path::new("/home/u/.expeval"), "yml"),
            Some(PathBuf::from("/home/u/.expeval.yml"))
        );
    }
}
