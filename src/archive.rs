//! Content-addressed durable store for evicted posts (spec §4.C). Each
//! post lives at `archive/<hash[0:2]>/<hash[2:]>.json`, written via a
//! temp-file-then-rename so a crash mid-write never leaves a partial
//! file behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::feed::model::Post;

pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self { root: data_dir.as_ref().join("archive") }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let (prefix, rest) = hash.split_at(hash.len().min(2));
        self.root.join(prefix).join(format!("{}.json", rest))
    }

    pub fn has(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    pub fn get(&self, hash: &str) -> Result<Option<Post>> {
        let path = self.path_for(hash);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).with_context(|| format!("reading archived post {}", hash))?;
        let post = serde_json::from_slice(&bytes).with_context(|| format!("decoding archived post {}", hash))?;
        Ok(Some(post))
    }

    /// Idempotent: archiving an already-archived hash is a no-op beyond
    /// the existence check, matching spec invariant 7.
    pub fn archive(&self, post: &Post) -> Result<()> {
        if self.has(&post.hash) {
            return Ok(());
        }
        let path = self.path_for(&post.hash);
        let dir = path.parent().expect("archive path always has a parent");
        std::fs::create_dir_all(dir).with_context(|| format!("creating archive directory {:?}", dir))?;

        let tmp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(post)?;
        std::fs::write(&tmp_path, &bytes).with_context(|| format!("writing temp archive file {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, &path).with_context(|| format!("renaming archive file into place {:?}", path))?;
        Ok(())
    }

    pub fn del(&self, hash: &str) -> Result<()> {
        let path = self.path_for(hash);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("deleting archived post {}", hash)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::model::{Element, Twter};
    use chrono::DateTime;

    fn sample_post() -> Post {
        let twter = Twter::new("alice", "https://a.example/twtxt.txt");
        let created = DateTime::parse_from_rfc3339("2016-02-03T23:05:00Z").unwrap();
        Post::new(twter, created, vec![Element::Text("hi".into())], "hi".into())
    }

    #[test]
    fn archive_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let post = sample_post();

        assert!(!archive.has(&post.hash));
        archive.archive(&post).unwrap();
        assert!(archive.has(&post.hash));

        let loaded = archive.get(&post.hash).unwrap().unwrap();
        assert_eq!(loaded.hash, post.hash);
    }

    #[test]
    fn archive_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let post = sample_post();

        archive.archive(&post).unwrap();
        archive.archive(&post).unwrap();
        assert!(archive.has(&post.hash));
    }

    #[test]
    fn del_on_missing_hash_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        archive.del("aaaaaaa").unwrap();
    }

    #[test]
    fn del_removes_archived_post() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let post = sample_post();
        archive.archive(&post).unwrap();
        archive.del(&post.hash).unwrap();
        assert!(!archive.has(&post.hash));
    }
}
