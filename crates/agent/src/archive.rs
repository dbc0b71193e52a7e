//! Job directories and their zip archives.

use crate::error::Result;
use scanfleet_core::{is_job_id, Assignment, ProtocolError};
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ASSIGNMENT_FILE: &str = "assignment.json";

pub fn jobdir(root: &Path, id: &str) -> PathBuf {
    root.join(id)
}

pub fn archive_path(root: &Path, id: &str) -> PathBuf {
    root.join(format!("{id}.zip"))
}

/// Create the private job directory and drop the assignment descriptor into it.
pub fn prepare_jobdir(root: &Path, assignment: &Assignment) -> Result<PathBuf> {
    let dir = jobdir(root, &assignment.id);
    if !is_job_id(&assignment.id) || dir.parent() != Some(root) {
        return Err(ProtocolError::Schema(format!("invalid job id {:?}", assignment.id)).into());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(&dir)?;
    let descriptor = serde_json::to_vec_pretty(assignment).map_err(io::Error::from)?;
    fs::write(dir.join(ASSIGNMENT_FILE), descriptor)?;
    Ok(dir)
}

/// Zip `dir` into `<dir>.zip` next to it and remove the directory.
pub fn pack_jobdir(dir: &Path) -> Result<PathBuf> {
    let mut zip_path = dir.as_os_str().to_owned();
    zip_path.push(".zip");
    let zip_path = PathBuf::from(zip_path);
    let mut zip = ZipWriter::new(File::create(&zip_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();
    for path in files {
        let name = path.strip_prefix(dir).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(&path)?)?;
    }
    zip.finish()?;
    fs::remove_dir_all(dir)?;
    Ok(zip_path)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanfleet_core::AssignmentConfig;
    use std::io::Read;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn packs_nested_files_and_removes_dir() {
        let root = tempfile::tempdir().unwrap();
        let a = Assignment::new(AssignmentConfig::new("dummy"), vec!["10.0.0.1".into()]);
        let dir = prepare_jobdir(root.path(), &a).unwrap();
        assert_eq!(fs::metadata(&dir).unwrap().permissions().mode() & 0o777, 0o700);
        fs::create_dir(dir.join("raw")).unwrap();
        fs::write(dir.join("raw/scan.log"), b"log").unwrap();

        let zip_path = pack_jobdir(&dir).unwrap();
        assert_eq!(zip_path, archive_path(root.path(), &a.id));
        assert!(!dir.exists());

        let mut zip = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["assignment.json", "raw/scan.log"]);
        let mut descriptor = String::new();
        zip.by_name(ASSIGNMENT_FILE).unwrap().read_to_string(&mut descriptor).unwrap();
        assert_eq!(Assignment::from_json(&descriptor).unwrap(), a);
    }

    #[test]
    fn jobdir_must_stay_inside_workdir() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("work");
        let victim = base.path().join("victim");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&victim).unwrap();
        fs::write(victim.join("keep.txt"), b"keep").unwrap();

        for id in ["../victim", "/tmp/x", "a/../../victim"] {
            let a = Assignment { id: id.into(), config: AssignmentConfig::new("dummy"), targets: Vec::new() };
            assert!(matches!(prepare_jobdir(&root, &a), Err(crate::error::AgentError::Protocol(_))), "{id}");
        }
        assert!(victim.join("keep.txt").exists());
        assert!(!root.join(ASSIGNMENT_FILE).exists());
    }
}
