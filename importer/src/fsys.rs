//! This module provides the [SourceFs] trait, a read-only view of an import source, with implementations for
//! plain directories ([DirFs]) and zip archives ([ZipFs]).
//!
//! Paths handed to and returned by a [SourceFs] are relative, use `/` as separator, and the empty string names
//! the root.  All methods block; async callers wrap them in `tokio::task::block_in_place`.

use {
    crate::banned,
    anyhow::{anyhow, Result},
    chrono::{DateTime, Utc},
    regex::Regex,
    std::{
        collections::{BTreeMap, BTreeSet, HashMap},
        fmt::{self, Debug},
        fs::{self, File},
        io::{self, Read, Seek, SeekFrom, Write},
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    },
    tempfile::SpooledTempFile,
    tracing::info,
    zip::ZipArchive,
};

/// Zip entries smaller than this are extracted in memory; larger ones spill to a temporary file
const SPOOL_LIMIT: usize = 16 * 1024 * 1024;

/// A directory entry
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

/// What the source knows about a file
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileInfo {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// A readable stream over a file of a source
pub type Reader = Box<dyn Read + Send>;

/// Read-only filesystem an import draws files from
pub trait SourceFs: Send + Sync + Debug {
    /// Name of the source: the directory's base name or the archive's name without extension
    fn name(&self) -> &str;

    /// List the entries of `dir`, sorted by name.
    fn read_dir(&self, dir: &str) -> Result<Vec<Entry>>;

    fn stat(&self, path: &str) -> Result<FileInfo>;

    fn open(&self, path: &str) -> Result<Reader>;

    /// Return the path of the file on the local disk, if it has one.
    fn local_path(&self, path: &str) -> Option<PathBuf>;

    /// Read a whole (small) file.
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.open(path)?.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Copy the file at `path` to `output`, returning the number of bytes copied.
    fn copy_to(&self, path: &str, output: &mut dyn Write) -> Result<u64> {
        Ok(io::copy(&mut self.open(path)?, output)?)
    }
}

/// Join a directory and a name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}

/// Return the directory part of `path`, or "" at the root.
pub fn parent(path: &str) -> &str {
    path.rfind('/').map(|index| &path[..index]).unwrap_or("")
}

/// Return the last component of `path`.
pub fn base(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn modified(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// A directory of the local disk
pub struct DirFs {
    root: PathBuf,
    name: String,

    /// Filter applied to the entries of the root, when the source was given as a glob
    filter: Option<Regex>,
}

impl Debug for DirFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirFs({})", self.root.display())
    }
}

impl DirFs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();

        let name = root
            .canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(&root)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            root,
            name,
            filter: None,
        }
    }

    /// Only consider the entries of the root whose names match `pattern` (a shell-like glob).
    pub fn with_filter(mut self, pattern: &str) -> Result<Self> {
        let regex = banned::glob_regex(pattern)?;

        self.filter = Some(Regex::new(&format!("^(?:{})$", regex.as_str()))?);

        Ok(self)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl SourceFs for DirFs {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_dir(&self, dir: &str) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(self.full_path(dir))? {
            let entry = entry?;

            let name = entry
                .file_name()
                .to_str()
                .ok_or_else(|| anyhow!("bad utf8 in {:?}", entry.path()))?
                .to_owned();

            if let (true, Some(filter)) = (dir.is_empty(), &self.filter) {
                if !filter.is_match(&name) {
                    continue;
                }
            }

            entries.push(Entry {
                name,
                is_dir: entry.path().is_dir(),
            });
        }

        entries.sort();

        Ok(entries)
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let metadata = fs::metadata(self.full_path(path))?;

        Ok(FileInfo {
            size: metadata.len(),
            modified: modified(&metadata),
        })
    }

    fn open(&self, path: &str) -> Result<Reader> {
        Ok(Box::new(File::open(self.full_path(path))?))
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.full_path(path))
    }
}

/// A zip archive, typically one part of a Google Photos takeout
pub struct ZipFs {
    path: PathBuf,
    name: String,
    archive: Mutex<ZipArchive<File>>,

    /// Index and size of every file entry
    files: HashMap<String, (usize, u64)>,

    /// Entries of every directory, including directories only implied by file paths
    dirs: BTreeMap<String, BTreeSet<Entry>>,
}

impl Debug for ZipFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZipFs({})", self.path.display())
    }
}

impl ZipFs {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut archive = ZipArchive::new(File::open(&path)?)?;

        let mut files = HashMap::new();
        let mut dirs = BTreeMap::<String, BTreeSet<Entry>>::new();

        dirs.insert(String::new(), BTreeSet::new());

        for index in 0..archive.len() {
            let file = archive.by_index(index)?;
            let name = file.name().trim_end_matches('/').to_owned();
            let is_dir = file.is_dir();

            if name.is_empty() {
                continue;
            }

            if !is_dir {
                files.insert(name.clone(), (index, file.size()));
            } else {
                dirs.entry(name.clone()).or_default();
            }

            // Register the entry and all its ancestors with their parents.
            let mut child = name.as_str();
            let mut child_is_dir = is_dir;

            loop {
                let dir = parent(child);

                dirs.entry(dir.to_owned()).or_default().insert(Entry {
                    name: base(child).to_owned(),
                    is_dir: child_is_dir,
                });

                if dir.is_empty() {
                    break;
                }

                child = dir;
                child_is_dir = true;
            }
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(
            "opened {} with {} files in {} directories",
            path.display(),
            files.len(),
            dirs.len()
        );

        Ok(Self {
            path,
            name,
            archive: Mutex::new(archive),
            files,
            dirs,
        })
    }

    fn entry(&self, path: &str) -> Result<(usize, u64)> {
        self.files
            .get(path)
            .copied()
            .ok_or_else(|| anyhow!("{path} not found in {}", self.path.display()))
    }
}

impl SourceFs for ZipFs {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_dir(&self, dir: &str) -> Result<Vec<Entry>> {
        Ok(self
            .dirs
            .get(dir)
            .ok_or_else(|| anyhow!("{dir} not found in {}", self.path.display()))?
            .iter()
            .cloned()
            .collect())
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        Ok(FileInfo {
            size: self.entry(path)?.1,
            modified: None,
        })
    }

    fn open(&self, path: &str) -> Result<Reader> {
        let mut spool = SpooledTempFile::new(SPOOL_LIMIT);

        self.copy_to(path, &mut spool)?;

        spool.seek(SeekFrom::Start(0))?;

        Ok(Box::new(spool))
    }

    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    fn copy_to(&self, path: &str, output: &mut dyn Write) -> Result<u64> {
        let (index, _) = self.entry(path)?;

        let mut archive = self
            .archive
            .lock()
            .map_err(|_| anyhow!("poisoned lock on {}", self.path.display()))?;

        let copied = io::copy(&mut archive.by_index(index)?, output)?;
        Ok(copied)
    }
}

fn is_zip(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false)
}

fn is_glob(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// Turn command line arguments into sources: directories are walked, zip files are mounted, and a glob in the
/// last component selects zip files or entries of its parent directory.
pub fn parse_args(args: &[String]) -> Result<Vec<Arc<dyn SourceFs>>> {
    let mut sources = Vec::<Arc<dyn SourceFs>>::new();

    for arg in args {
        let path = Path::new(arg);

        if path.is_dir() {
            sources.push(Arc::new(DirFs::new(path)));
        } else if is_zip(path) {
            sources.push(Arc::new(ZipFs::open(path)?));
        } else {
            let pattern = path
                .file_name()
                .and_then(|name| name.to_str())
                .filter(|name| is_glob(name))
                .ok_or_else(|| anyhow!("{arg}: no such file or directory"))?;

            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };

            let filtered = DirFs::new(&dir).with_filter(pattern)?;
            let matches = filtered.read_dir("")?;

            if matches.is_empty() {
                return Err(anyhow!("{arg}: no match"));
            }

            let mut others = false;

            for entry in matches {
                let matched = dir.join(&entry.name);

                if !entry.is_dir && is_zip(&matched) {
                    sources.push(Arc::new(ZipFs::open(matched)?));
                } else {
                    others = true;
                }
            }

            if others {
                sources.push(Arc::new(filtered));
            }
        }
    }

    Ok(sources)
}
