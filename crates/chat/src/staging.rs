//! Attachment staging for files selected but not yet sent.

use std::path::Path;
use std::sync::Arc;

use chatdeck_core::message::{Attachment, AttachmentKind};
use tracing::debug;
use uuid::Uuid;

use crate::locator::LocatorRegistry;

/// What the file picker hands over: a name, a size, and maybe a MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            size_bytes,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Describe a file on disk. The bytes are never read.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = path
            .extension()
            .and_then(|ext| mime_for_extension(&ext.to_string_lossy()))
            .map(str::to_string);
        Ok(Self {
            name,
            mime_type,
            size_bytes: metadata.len(),
        })
    }

    pub fn kind(&self) -> AttachmentKind {
        self.mime_type
            .as_deref()
            .map(AttachmentKind::from_mime)
            .unwrap_or(AttachmentKind::File)
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" | "md" => "text/plain",
        "html" => "text/html",
        "css" => "text/css",
        "js" | "jsx" => "text/javascript",
        "ts" | "tsx" => "text/typescript",
        _ => return None,
    };
    Some(mime)
}

/// Holds attachments between selection and send.
///
/// Each staged attachment owns a live locator. `remove` releases it;
/// `drain_all` and `take` hand it over to the caller.
pub struct AttachmentStaging {
    items: Vec<Attachment>,
    locators: Arc<LocatorRegistry>,
}

impl AttachmentStaging {
    pub fn new(locators: Arc<LocatorRegistry>) -> Self {
        Self {
            items: Vec::new(),
            locators,
        }
    }

    /// Stage a file. Ids are unique even for files added in the same tick.
    pub fn add(&mut self, file: FileDescriptor) -> Attachment {
        let attachment = Attachment {
            id: Uuid::new_v4().to_string(),
            kind: file.kind(),
            name: file.name,
            locator: self.locators.create(),
            size_bytes: file.size_bytes,
        };
        debug!(attachment_id = %attachment.id, name = %attachment.name, "Staged attachment");
        self.items.push(attachment.clone());
        attachment
    }

    /// Unstage one attachment and release its locator.
    pub fn remove(&mut self, id: &str) -> Option<Attachment> {
        let pos = self.items.iter().position(|a| a.id == id)?;
        let removed = self.items.remove(pos);
        self.locators.revoke(&removed.locator);
        Some(removed)
    }

    /// Return everything staged, in order, and clear the staging area.
    pub fn drain_all(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.items)
    }

    /// Remove exactly the given ids without releasing their locators.
    pub fn take(&mut self, ids: &[String]) -> Vec<Attachment> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|a| ids.contains(&a.id));
        self.items = kept;
        taken
    }

    pub fn items(&self) -> &[Attachment] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn staging() -> (AttachmentStaging, Arc<LocatorRegistry>) {
        let registry = Arc::new(LocatorRegistry::new());
        (AttachmentStaging::new(registry.clone()), registry)
    }

    #[test]
    fn burst_of_adds_gets_distinct_ids() {
        let (mut staging, _) = staging();
        let ids: HashSet<String> = (0..200)
            .map(|i| staging.add(FileDescriptor::new(format!("f{i}.txt"), 1)).id)
            .collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn kind_follows_mime() {
        let (mut staging, _) = staging();
        let image = staging.add(FileDescriptor::new("logo.png", 10).with_mime("image/png"));
        let file = staging.add(FileDescriptor::new("notes", 10));
        assert_eq!(image.kind, AttachmentKind::Image);
        assert_eq!(file.kind, AttachmentKind::File);
    }

    #[test]
    fn remove_releases_locator() {
        let (mut staging, registry) = staging();
        let a = staging.add(FileDescriptor::new("a.txt", 1));
        let b = staging.add(FileDescriptor::new("b.txt", 1));

        let removed = staging.remove(&a.id).unwrap();
        assert_eq!(removed.id, a.id);
        assert!(!registry.is_live(&a.locator));
        assert!(registry.is_live(&b.locator));
        assert!(staging.remove(&a.id).is_none());
        assert_eq!(staging.len(), 1);
    }

    #[test]
    fn drain_returns_in_order_and_clears() {
        let (mut staging, registry) = staging();
        let a = staging.add(FileDescriptor::new("a.txt", 1));
        let b = staging.add(FileDescriptor::new("b.txt", 1));

        let drained = staging.drain_all();
        assert_eq!(drained, vec![a.clone(), b]);
        assert!(staging.is_empty());
        // Ownership of the locator moves to the caller
        assert!(registry.is_live(&a.locator));
    }

    #[test]
    fn take_leaves_other_items_staged() {
        let (mut staging, _) = staging();
        let a = staging.add(FileDescriptor::new("a.txt", 1));
        let b = staging.add(FileDescriptor::new("b.txt", 1));

        let taken = staging.take(&[a.id.clone()]);
        assert_eq!(taken, vec![a]);
        assert_eq!(staging.items(), &[b]);
    }

    #[test]
    fn descriptor_from_path_reads_size_and_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.JPG");
        std::fs::write(&path, [0u8; 2048]).unwrap();

        let file = FileDescriptor::from_path(&path).unwrap();
        assert_eq!(file.name, "photo.JPG");
        assert_eq!(file.size_bytes, 2048);
        assert_eq!(file.mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(file.kind(), AttachmentKind::Image);
    }
}
