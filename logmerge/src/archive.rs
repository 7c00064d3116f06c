//! Archive member enumeration and extraction.
//!
//! Supported containers: `.zip`, `.gz`, `.tar`, `.7z`. Enumeration lists
//! member paths so the scanner can match formats against them; extraction
//! inflates one member into memory for a seekable reader.

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;

pub const ARCHIVE_EXTENSIONS: [&str; 4] = [".zip", ".gz", ".tar", ".7z"];

pub fn is_archive_extension(extension: &str) -> bool {
    ARCHIVE_EXTENSIONS.contains(&extension)
}

fn archive_err(path: &Path, reason: impl ToString) -> Error {
    Error::Archive {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// List the file members of an archive. For `.gz` this is the single
/// stream, named after the archive minus its `.gz` suffix.
pub fn list_members(path: &Path, extension: &str) -> Result<Vec<String>> {
    match extension {
        ".zip" => list_zip(path),
        ".gz" => {
            let member = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
                .ok_or_else(|| archive_err(path, "unrepresentable gzip member name"))?;
            Ok(vec![member])
        }
        ".tar" => list_tar(path),
        ".7z" => list_7z(path),
        other => Err(archive_err(path, format!("unsupported archive extension {other:?}"))),
    }
}

fn list_zip(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(path, e))?;

    let mut members = Vec::new();
    for index in 0..zip.len() {
        let member = zip.by_index(index).map_err(|e| archive_err(path, e))?;
        if member.is_file() {
            members.push(member.name().to_string());
        }
    }
    Ok(members)
}

fn list_tar(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut tar = tar::Archive::new(file);

    let mut members = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        if entry.header().entry_type().is_file() {
            let member = entry.path()?;
            if let Some(name) = member.to_str() {
                members.push(name.to_string());
            }
        }
    }
    Ok(members)
}

fn list_7z(path: &Path) -> Result<Vec<String>> {
    let mut sz = sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty())
        .map_err(|e| archive_err(path, e))?;

    let mut members = Vec::new();
    sz.for_each_entries(|entry, _reader| {
        if !entry.is_directory() {
            members.push(entry.name().to_string());
        }
        Ok(true)
    })
    .map_err(|e| archive_err(path, e))?;
    Ok(members)
}

pub fn read_zip_member(path: &Path, member: &str) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(path, e))?;
    let mut entry = zip.by_name(member).map_err(|e| archive_err(path, e))?;

    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

pub fn read_gzip(path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut decoder = flate2::read::GzDecoder::new(file);

    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    Ok(data)
}

pub fn read_tar_member(path: &Path, member: &str) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut tar = tar::Archive::new(file);

    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(member) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(data);
        }
    }
    Err(archive_err(path, format!("member {member:?} not found")))
}

pub fn read_7z_member(path: &Path, member: &str) -> Result<Vec<u8>> {
    let mut sz = sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty())
        .map_err(|e| archive_err(path, e))?;

    let mut data: Option<Vec<u8>> = None;
    let mut read_error: Option<std::io::Error> = None;
    let wanted = member.to_string();
    sz.for_each_entries(|entry, reader| {
        if entry.name() == wanted {
            let mut buf = Vec::new();
            match reader.read_to_end(&mut buf) {
                Ok(_) => data = Some(buf),
                Err(e) => read_error = Some(e),
            }
            return Ok(false);
        }
        Ok(true)
    })
    .map_err(|e| archive_err(path, e))?;

    if let Some(e) = read_error {
        return Err(Error::Io(e));
    }
    data.ok_or_else(|| archive_err(path, format!("member {member:?} not found")))
}

/// Split an archive member path into `(stem, extension)` the way the
/// scanner expects them: the basename without its last dot-suffix, and the
/// suffix with its dot.
pub fn member_stem_extension(member: &str) -> (String, String) {
    let basename = member
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(member);
    match basename.rfind('.') {
        Some(dot) if dot > 0 => (basename[..dot].to_string(), basename[dot..].to_string()),
        _ => (basename.to_string(), String::new()),
    }
}
