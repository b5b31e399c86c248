use configparser::ini::Ini;
use serac_backends::{LocalStore, S3Config, S3Store};
use serac_core::{Error, ObjectStore, Pattern, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parsed and validated serac configuration file.
///
/// INI format with three required sections:
///
/// ```ini
/// [source]
/// include = /home /etc
/// exclude = /home/nobody/cache
///
/// [archive]
/// storage = local
/// path = /mnt/archive
/// password = hunter2
///
/// [index]
/// path = /var/lib/serac/index.db
/// ```
#[derive(Debug)]
pub struct Config {
    pub source: SourceConfig,
    pub archive: ArchiveConfig,
    pub index: IndexConfig,
}

#[derive(Debug)]
pub struct SourceConfig {
    pub includes: Vec<PathBuf>,
    pub excludes: Vec<Pattern>,
}

#[derive(Debug)]
pub struct ArchiveConfig {
    pub storage: StorageConfig,
    pub password: String,
}

#[derive(Debug)]
pub enum StorageConfig {
    Local { path: PathBuf },
    S3(S3Config),
}

#[derive(Debug)]
pub struct IndexConfig {
    pub path: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.set_multiline(true);
        ini.load(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let mut sections = ini.sections();
        sections.sort();
        if sections != ["archive", "index", "source"] {
            return Err(Error::Config(format!(
                "config must contain source, archive and index sections; found: {}",
                sections.join(", ")
            )));
        }

        Ok(Self {
            source: SourceConfig::parse(&ini)?,
            archive: ArchiveConfig::parse(&ini)?,
            index: IndexConfig::parse(&ini)?,
        })
    }

    pub async fn open_store(&self) -> Result<Arc<dyn ObjectStore>> {
        match &self.archive.storage {
            StorageConfig::Local { path } => Ok(Arc::new(LocalStore::new(path))),
            StorageConfig::S3(s3) => Ok(Arc::new(S3Store::connect(s3.clone()).await?)),
        }
    }
}

impl SourceConfig {
    fn parse(ini: &Ini) -> Result<Self> {
        let includes: Vec<PathBuf> = list_value(ini, "source", "include")
            .iter()
            .map(|raw| absolute_literal_path("source.include", raw))
            .collect::<Result<_>>()?;
        if includes.is_empty() {
            return Err(Error::Config(
                "the source section must declare at least one include".to_string(),
            ));
        }

        let excludes = list_value(ini, "source", "exclude")
            .iter()
            .map(|raw| {
                absolute_literal_path("source.exclude", raw)?;
                Pattern::new(raw)
            })
            .collect::<Result<_>>()?;

        Ok(Self { includes, excludes })
    }
}

impl ArchiveConfig {
    fn parse(ini: &Ini) -> Result<Self> {
        let storage_type = required(ini, "archive", "storage")?;
        let password = required(ini, "archive", "password")?;

        let storage = match storage_type.as_str() {
            "local" => StorageConfig::Local {
                path: PathBuf::from(required(ini, "archive", "path")?),
            },
            "s3" => StorageConfig::S3(S3Config {
                key: required(ini, "archive", "key")?,
                secret: required(ini, "archive", "secret")?,
                bucket: required(ini, "archive", "bucket")?,
                path: ini.get("archive", "path").unwrap_or_default(),
            }),
            other => {
                return Err(Error::Config(format!(
                    "the archive storage {other:?} is not recognised (expected local or s3)"
                )))
            }
        };

        Ok(Self { storage, password })
    }
}

impl IndexConfig {
    fn parse(ini: &Ini) -> Result<Self> {
        let path = PathBuf::from(required(ini, "index", "path")?);
        match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => {}
            _ => {
                return Err(Error::Config(format!(
                    "the directory for the index {} does not exist",
                    path.display()
                )))
            }
        }
        Ok(Self { path })
    }
}

/// Whitespace-separated (possibly multi-line) list value.
fn list_value(ini: &Ini, section: &str, key: &str) -> Vec<String> {
    ini.get(section, key)
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn required(ini: &Ini, section: &str, key: &str) -> Result<String> {
    ini.get(section, key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Config(format!("the {section} section must declare {key}")))
}

fn absolute_literal_path(key: &str, raw: &str) -> Result<PathBuf> {
    if raw.contains('*') || raw.contains('?') {
        return Err(Error::Config(format!(
            "{key}: glob patterns are not supported: {raw:?} (use a literal path prefix)"
        )));
    }
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(Error::Config(format!(
            "{key}: paths must be absolute: {raw:?}"
        )));
    }
    Ok(path)
}
