//! 저장소 추상화
//!
//! 파일 단위 append 연산만 필요하다. 디렉터리 기반 구현과
//! 메모리 구현(테스트, 시뮬레이터용)을 제공한다.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// 저장소
pub trait Storage: Send + Sync {
    /// 파일 존재 여부
    fn exists(&self, name: &str) -> bool;

    /// 빈 파일 생성 (이미 있으면 비움)
    fn create(&mut self, name: &str) -> io::Result<()>;

    /// 파일 끝에 추가, 쓴 바이트 수 반환
    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<usize>;

    /// 파일 전체 읽기
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;

    fn remove(&mut self, name: &str) -> io::Result<()>;
}

/// 디렉터리 저장소
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// 디렉터리가 없으면 생성
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        // 장치가 준 이름이 디렉터리를 벗어나지 못하게 한다
        let file_name = Path::new(name)
            .file_name()
            .filter(|n| n.to_str() == Some(name))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("잘못된 파일명: {}", name))
            })?;
        Ok(self.root.join(file_name))
    }
}

impl Storage for FsStorage {
    fn exists(&self, name: &str) -> bool {
        self.path(name).map(|p| p.exists()).unwrap_or(false)
    }

    fn create(&mut self, name: &str) -> io::Result<()> {
        fs::File::create(self.path(name)?)?;
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<usize> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name)?)?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(name)?)
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from)?, self.path(to)?)
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name)?)
    }
}

/// 메모리 저장소
///
/// 복제본끼리 내용을 공유하므로 fetcher에 넘긴 뒤에도 결과를 볼 수 있다.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.files.insert(name.to_string(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(name).map(|f| f.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("파일 없음: {}", name))
}

impl Storage for MemoryStorage {
    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn create(&mut self, name: &str) -> io::Result<()> {
        self.files.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<usize> {
        self.files
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.get(name).ok_or_else(|| not_found(name))
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let (_, data) = self.files.remove(from).ok_or_else(|| not_found(from))?;
        self.files.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        self.files.remove(name).map(|_| ()).ok_or_else(|| not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_storage_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();

        storage.create("a.fit").unwrap();
        storage.append("a.fit", b"hello ").unwrap();
        storage.append("a.fit", b"world").unwrap();

        assert!(storage.exists("a.fit"));
        assert_eq!(storage.read("a.fit").unwrap(), b"hello world");

        storage.rename("a.fit", "b.fit").unwrap();
        assert!(!storage.exists("a.fit"));
        storage.remove("b.fit").unwrap();
        assert!(!storage.exists("b.fit"));
    }

    #[test]
    fn test_fs_storage_create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();

        storage.append("x.fit", b"old data").unwrap();
        storage.create("x.fit").unwrap();
        assert!(storage.read("x.fit").unwrap().is_empty());
    }

    #[test]
    fn test_fs_storage_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FsStorage::new(dir.path()).unwrap();

        assert!(storage.create("../escape.fit").is_err());
        assert!(storage.append("sub/dir.fit", b"x").is_err());
        assert!(!storage.exists(".."));
    }

    #[test]
    fn test_memory_storage_shared() {
        let storage = MemoryStorage::new();
        let mut handle = storage.clone();

        handle.append("a", b"12").unwrap();
        handle.append("a", b"34").unwrap();
        assert_eq!(storage.get("a").unwrap(), b"1234");

        handle.rename("a", "b").unwrap();
        assert_eq!(storage.names(), vec!["b".to_string()]);
        assert!(handle.read("a").is_err());
    }
}
