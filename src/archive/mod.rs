//! Uniform access to comic archive containers.
//!
//! A comic is a zip (`.cbz`) or rar (`.cbr`) file holding one image per page.
//! Extensions lie often enough that they are never consulted: [`identify`]
//! reads the first four bytes and picks the container from the signature.
//!
//! | Signature | Container | Reader |
//! |---|---|---|
//! | `PK\x03\x04` | zip | [`ZipBook`] (`zip` crate, random access) |
//! | `Rar!` | rar | [`RarBook`] (`unrar`, sequential) |
//!
//! Callers never branch on the container again after [`open`]: both readers
//! implement [`ArchiveReader`], and the page-level helpers in this module
//! ([`list_image_members`], [`extract_all`]) only talk to the trait.
//!
//! ## Page order
//!
//! Pages are the image members (`jpg`, `jpeg`, `jpe`, `gif`, `png`, non-empty)
//! sorted lexicographically by member name. Scanners zero-pad page numbers,
//! so name order is page order. [`extract_all`] renames every page to
//! `{prefix}{NNNN}{ext}` (1-based) so the output reproduces that order no
//! matter what the members were called.

mod rar;
mod zip;

pub use rar::RarBook;
pub use zip::ZipBook;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unrecognized archive format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Corrupt archive {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("This archive has no image files: {0}")]
    NoImages(PathBuf),
    #[error("Member not found in archive: {0}")]
    MemberNotFound(String),
}

/// Container format, decided from the file signature alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Rar,
    Unknown,
}

const ZIP_SIGNATURE: &[u8; 4] = b"PK\x03\x04";
const RAR_SIGNATURE: &[u8; 4] = b"Rar!";

/// File extensions accepted as pages (compared lower-cased).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jpe", "gif", "png"];

/// Largest member either reader will read or write. Sizes come from the
/// archive's own headers and are not trusted: a member declaring more is
/// corrupt, and reads are cut off here whatever the header says.
pub const MAX_MEMBER_BYTES: u64 = 256 << 20;

/// One member of an archive, as reported by the container's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Container-agnostic reader over a single opened archive.
pub trait ArchiveReader: Send {
    fn kind(&self) -> ArchiveKind;

    fn path(&self) -> &Path;

    /// Every member in container order, directories included.
    fn members(&mut self) -> Result<Vec<MemberInfo>, ArchiveError>;

    /// Read one member fully into memory, streaming from the container.
    fn read_member(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError>;

    /// Write the named members straight to their paired output paths.
    ///
    /// Members not named in `plan` are skipped. Any failure aborts the whole
    /// operation; cleanup of partial output is the caller's job.
    fn write_members(&mut self, plan: &[(String, PathBuf)]) -> Result<(), ArchiveError>;
}

/// Classify a file by its first four bytes.
///
/// Files shorter than four bytes are `Unknown`; only open/read failures are
/// errors.
pub fn identify(path: &Path) -> Result<ArchiveKind, ArchiveError> {
    let mut sig = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < sig.len() {
        let n = file.read(&mut sig[filled..])?;
        if n == 0 {
            return Ok(ArchiveKind::Unknown);
        }
        filled += n;
    }
    Ok(match &sig {
        ZIP_SIGNATURE => ArchiveKind::Zip,
        RAR_SIGNATURE => ArchiveKind::Rar,
        _ => ArchiveKind::Unknown,
    })
}

/// Open an archive with the reader matching its signature.
///
/// An unrecognized signature comes back as
/// [`ArchiveError::UnsupportedFormat`]; a recognized container that cannot
/// be parsed is [`ArchiveError::Corrupt`].
pub fn open(path: &Path) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    match identify(path)? {
        ArchiveKind::Zip => Ok(Box::new(ZipBook::open(path)?)),
        ArchiveKind::Rar => Ok(Box::new(RarBook::open(path)?)),
        ArchiveKind::Unknown => Err(ArchiveError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Is this member name a page image (by extension, case-insensitive)?
pub fn is_image_name(name: &str) -> bool {
    extension_of(name)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn extension_of(name: &str) -> Option<&str> {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rfind('.') {
        Some(dot) if dot + 1 < file.len() => Some(&file[dot + 1..]),
        _ => None,
    }
}

/// Page members of an archive: non-empty images, lexicographic by name.
pub fn list_image_members(
    reader: &mut dyn ArchiveReader,
) -> Result<Vec<MemberInfo>, ArchiveError> {
    let mut pages: Vec<MemberInfo> = reader
        .members()?
        .into_iter()
        .filter(|m| !m.is_dir && m.size > 0 && is_image_name(&m.name))
        .collect();
    pages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(pages)
}

/// Output filename for a page: `{prefix}{NNNN}{.ext}`, extension lower-cased.
pub fn page_filename(prefix: &str, page: usize, member_name: &str) -> String {
    let ext = extension_of(member_name)
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    format!("{}{:04}{}", prefix, page, ext)
}

/// Extract every page into `dest`, renamed to preserve page order.
///
/// Returns output paths in page order. On any failure the files written so
/// far are removed and the error is returned; callers never see a partial
/// page set.
pub fn extract_all(
    reader: &mut dyn ArchiveReader,
    dest: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let pages = list_image_members(reader)?;
    let plan: Vec<(String, PathBuf)> = pages
        .iter()
        .enumerate()
        .map(|(i, m)| (m.name.clone(), dest.join(page_filename(prefix, i + 1, &m.name))))
        .collect();

    std::fs::create_dir_all(dest)?;

    if let Err(e) = reader.write_members(&plan) {
        for (_, out) in &plan {
            let _ = std::fs::remove_file(out);
        }
        return Err(e);
    }

    Ok(plan.into_iter().map(|(_, out)| out).collect())
}

/// The cover: first page bytes plus the total page count.
pub fn read_cover(reader: &mut dyn ArchiveReader) -> Result<(usize, Vec<u8>), ArchiveError> {
    let pages = list_image_members(reader)?;
    let first = pages
        .first()
        .ok_or_else(|| ArchiveError::NoImages(reader.path().to_path_buf()))?;
    let bytes = reader.read_member(&first.name)?;
    Ok((pages.len(), bytes))
}

pub(crate) fn oversized(path: &Path, name: &str, size: u64) -> ArchiveError {
    corrupt(
        path,
        format!("member {} is {} bytes, limit is {}", name, size, MAX_MEMBER_BYTES),
    )
}

pub(crate) fn corrupt(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
