use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open file {path:?}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not set mode of {path:?} to {mode:o}")]
    SetPermissions {
        path: PathBuf,
        mode: u32,
        source: std::io::Error,
    },
    #[error("could not create directories {path:?}")]
    CreateDirectories {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::OpenFile { source, .. }
            | Error::SetPermissions { source, .. }
            | Error::CreateDirectories { source, .. } => source,
        }
    }
}

#[inline]
pub fn open_readable(path: impl AsRef<Path>) -> Result<std::io::BufReader<std::fs::File>, Error> {
    let path = path.as_ref();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| Error::OpenFile {
            source,
            path: path.to_path_buf(),
        })?;
    Ok(std::io::BufReader::new(file))
}

/// Open a file for writing, truncating existing contents.
///
/// Result files are shared between users of the benchmark machine,
/// hence the permissive mode.
#[inline]
pub fn open_writable(path: impl AsRef<Path>) -> Result<std::io::BufWriter<std::fs::File>, Error> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mode: u32 = 0o666;
    let path = path.as_ref();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .mode(mode)
        .create(true)
        .open(path)
        .map_err(|source| Error::OpenFile {
            source,
            path: path.to_path_buf(),
        })?;

    let mut permissions = file
        .metadata()
        .map_err(|source| Error::OpenFile {
            source,
            path: path.to_path_buf(),
        })?
        .permissions();
    permissions.set_mode(mode);
    file.set_permissions(permissions)
        .map_err(|source| Error::SetPermissions {
            source,
            mode,
            path: path.to_path_buf(),
        })?;

    Ok(std::io::BufWriter::new(file))
}

/// Like [`open_writable`], but creates missing parent directories first.
#[inline]
pub fn create_writable(path: impl AsRef<Path>) -> Result<std::io::BufWriter<std::fs::File>, Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dirs(parent)?;
        }
    }
    open_writable(path)
}

#[inline]
pub fn create_dirs(path: impl AsRef<Path>) -> Result<(), Error> {
    use std::os::unix::fs::DirBuilderExt;
    let path = path.as_ref();
    match std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o777)
        .create(path)
    {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(Error::CreateDirectories {
            path: path.to_path_buf(),
            source,
        }),
    }
}
