//! CBZ reader on top of the `zip` crate.

use super::{
    ArchiveError, ArchiveKind, ArchiveReader, MAX_MEMBER_BYTES, MemberInfo, corrupt, oversized,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;
use zip::result::ZipError;

pub struct ZipBook {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl ZipBook {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }
}

fn map_zip_err(path: &Path, e: ZipError) -> ArchiveError {
    match e {
        ZipError::Io(io) => ArchiveError::Io(io),
        other => corrupt(path, other),
    }
}

impl ArchiveReader for ZipBook {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn members(&mut self) -> Result<Vec<MemberInfo>, ArchiveError> {
        let mut out = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            let entry = self.archive.by_index(i).map_err(|e| corrupt(&self.path, e))?;
            out.push(MemberInfo {
                name: entry.name().to_string(),
                size: entry.size(),
                is_dir: entry.is_dir(),
            });
        }
        Ok(out)
    }

    fn read_member(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(ArchiveError::MemberNotFound(name.to_string()));
            }
            Err(e) => return Err(corrupt(&self.path, e)),
        };
        if entry.size() > MAX_MEMBER_BYTES {
            return Err(oversized(&self.path, name, entry.size()));
        }
        let mut buf = Vec::new();
        entry
            .by_ref()
            .take(MAX_MEMBER_BYTES + 1)
            .read_to_end(&mut buf)
            .map_err(|e| corrupt(&self.path, e))?;
        if buf.len() as u64 > MAX_MEMBER_BYTES {
            return Err(oversized(&self.path, name, buf.len() as u64));
        }
        Ok(buf)
    }

    fn write_members(&mut self, plan: &[(String, PathBuf)]) -> Result<(), ArchiveError> {
        let targets: HashMap<&str, &Path> = plan
            .iter()
            .map(|(name, out)| (name.as_str(), out.as_path()))
            .collect();

        for (name, out) in targets {
            let mut entry = match self.archive.by_name(name) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => {
                    return Err(ArchiveError::MemberNotFound(name.to_string()));
                }
                Err(e) => return Err(map_zip_err(&self.path, e)),
            };
            if entry.size() > MAX_MEMBER_BYTES {
                return Err(oversized(&self.path, name, entry.size()));
            }
            let mut file = File::create(out)?;
            let written = io::copy(&mut entry.by_ref().take(MAX_MEMBER_BYTES + 1), &mut file)
                .map_err(|e| corrupt(&self.path, e))?;
            if written > MAX_MEMBER_BYTES {
                return Err(oversized(&self.path, name, written));
            }
        }
        Ok(())
    }
}
