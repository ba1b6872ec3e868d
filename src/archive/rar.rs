//! CBR reader on top of the `unrar` bindings.
//!
//! RAR only supports forward iteration: every read is one pass over the
//! headers from the start. The member directory is collected once at open
//! time, which doubles as the corruption check.

use super::{
    ArchiveError, ArchiveKind, ArchiveReader, MAX_MEMBER_BYTES, MemberInfo, corrupt, oversized,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use unrar::Archive;

pub struct RarBook {
    path: PathBuf,
    members: Vec<MemberInfo>,
}

impl RarBook {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let listing = Archive::new(path)
            .open_for_listing()
            .map_err(|e| corrupt(path, e))?;

        let mut members = Vec::new();
        for header in listing {
            let header = header.map_err(|e| corrupt(path, e))?;
            members.push(MemberInfo {
                name: member_name(&header.filename),
                size: header.unpacked_size,
                is_dir: header.is_directory(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            members,
        })
    }
}

fn member_name(filename: &Path) -> String {
    filename.to_string_lossy().replace('\\', "/")
}

impl ArchiveReader for RarBook {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Rar
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn members(&mut self) -> Result<Vec<MemberInfo>, ArchiveError> {
        Ok(self.members.clone())
    }

    fn read_member(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| corrupt(&self.path, e))?;

        while let Some(header) = archive.read_header().map_err(|e| corrupt(&self.path, e))? {
            if member_name(&header.entry().filename) == name {
                let size = header.entry().unpacked_size;
                if size > MAX_MEMBER_BYTES {
                    return Err(oversized(&self.path, name, size));
                }
                let (bytes, _) = header.read().map_err(|e| corrupt(&self.path, e))?;
                return Ok(bytes);
            }
            archive = header.skip().map_err(|e| corrupt(&self.path, e))?;
        }

        Err(ArchiveError::MemberNotFound(name.to_string()))
    }

    fn write_members(&mut self, plan: &[(String, PathBuf)]) -> Result<(), ArchiveError> {
        let mut remaining: HashMap<&str, &Path> = plan
            .iter()
            .map(|(name, out)| (name.as_str(), out.as_path()))
            .collect();

        let mut archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| corrupt(&self.path, e))?;

        while !remaining.is_empty() {
            let Some(header) = archive.read_header().map_err(|e| corrupt(&self.path, e))?
            else {
                break;
            };
            let name = member_name(&header.entry().filename);
            let size = header.entry().unpacked_size;
            archive = match remaining.remove(name.as_str()) {
                Some(_) if size > MAX_MEMBER_BYTES => {
                    return Err(oversized(&self.path, &name, size));
                }
                Some(out) => header
                    .extract_to(out)
                    .map_err(|e| corrupt(&self.path, e))?,
                None => header.skip().map_err(|e| corrupt(&self.path, e))?,
            };
        }

        match remaining.keys().next() {
            Some(missing) => Err(ArchiveError::MemberNotFound(missing.to_string())),
            None => Ok(()),
        }
    }
}
