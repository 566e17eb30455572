//! Persisted, append-only list of finished clips.
//!
//! The whole list lives in one blob store slot and is rewritten on every
//! append. Reads never touch the slot after `load`.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use log::{error, info};

use crate::error::AppError;
use crate::storage::BlobStore;

pub const GALLERY_SLOT: &str = "videos";

/// One finished clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    /// `data:<mime>;base64,...` of the whole clip
    #[serde(rename = "blob", alias = "media")]
    pub media: String,
    /// `data:image/jpeg;base64,...`, empty when no thumbnail was taken
    #[serde(default)]
    pub thumbnail: String,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// What a gallery tile shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryCard {
    pub id: String,
    pub thumbnail: Option<String>,
    pub duration_label: String,
    pub date_label: String,
}

impl From<&VideoRecord> for GalleryCard {
    fn from(record: &VideoRecord) -> Self {
        Self {
            id: record.id.clone(),
            thumbnail: (!record.thumbnail.is_empty()).then(|| record.thumbnail.clone()),
            duration_label: format!("{}s", record.duration_seconds.round() as i64),
            date_label: format_created_at(record.created_at),
        }
    }
}

/// e.g. "Oct 18, 14:05", in local time
pub fn format_created_at(created_at_ms: i64) -> String {
    match Local.timestamp_millis_opt(created_at_ms).single() {
        Some(dt) => dt.format("%b %-d, %H:%M").to_string(),
        None => String::new(),
    }
}

pub struct GalleryStore {
    store: Arc<dyn BlobStore>,
    records: Vec<VideoRecord>,
}

impl GalleryStore {
    /// Rehydrate from the `videos` slot. A missing slot is an empty gallery.
    pub fn load(store: Arc<dyn BlobStore>) -> Result<Self, AppError> {
        let records = match store.read(GALLERY_SLOT)? {
            Some(raw) => serde_json::from_str::<Vec<VideoRecord>>(&raw).map_err(|e| {
                error!("Gallery slot is unreadable: {}", e);
                AppError::CorruptStore(e.to_string())
            })?,
            None => Vec::new(),
        };

        info!("Loaded {} videos from gallery", records.len());
        Ok(Self { store, records })
    }

    /// Append and persist the full list in one write
    pub fn append(&mut self, record: VideoRecord) -> Result<(), AppError> {
        if self.get(&record.id).is_some() {
            return Err(AppError::DuplicateRecord(record.id));
        }

        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), AppError> {
        let json = serde_json::to_string(&self.records)
            .map_err(|e| AppError::Storage(format!("Failed to serialize gallery: {}", e)))?;
        self.store.write(GALLERY_SLOT, &json)
    }

    /// Records in append order, newest last
    pub fn all(&self) -> &[VideoRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&VideoRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cards(&self) -> Vec<GalleryCard> {
        self.records.iter().map(GalleryCard::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileBlobStore, MemoryBlobStore};
    use tempfile::TempDir;

    fn record(created_at: i64, duration: f64) -> VideoRecord {
        VideoRecord {
            id: created_at.to_string(),
            media: "data:video/x-motion-jpeg;base64,AAAA".to_string(),
            thumbnail: "data:image/jpeg;base64,BBBB".to_string(),
            duration_seconds: duration,
            created_at,
        }
    }

    struct FailingStore;

    impl BlobStore for FailingStore {
        fn read(&self, _key: &str) -> Result<Option<String>, AppError> {
            Ok(None)
        }

        fn write(&self, _key: &str, _value: &str) -> Result<(), AppError> {
            Err(AppError::Storage("quota exceeded".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_through_file_store() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(dir.path()).unwrap());

        let mut gallery = GalleryStore::load(store.clone()).unwrap();
        assert!(gallery.is_empty());

        let appended: Vec<_> = (0..5).map(|i| record(1_700_000_000_000 + i, 3.0)).collect();
        for r in &appended {
            gallery.append(r.clone()).unwrap();
        }
        assert_eq!(gallery.all(), appended.as_slice());

        let reloaded = GalleryStore::load(store).unwrap();
        assert_eq!(reloaded.all(), appended.as_slice());
    }

    #[test]
    fn test_reads_do_not_mutate() {
        let mut gallery = GalleryStore::load(Arc::new(MemoryBlobStore::new())).unwrap();
        gallery.append(record(1, 2.0)).unwrap();

        let first = gallery.all().to_vec();
        let second = gallery.all().to_vec();
        assert_eq!(first, second);
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_corrupt_slot() {
        let store = Arc::new(MemoryBlobStore::new());
        store.write(GALLERY_SLOT, "{not json").unwrap();
        assert!(matches!(
            GalleryStore::load(store),
            Err(AppError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_media_alias_accepted() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .write(
                GALLERY_SLOT,
                r#"[{"id":"5","media":"data:x;base64,","duration":4,"createdAt":5}]"#,
            )
            .unwrap();

        let gallery = GalleryStore::load(store).unwrap();
        let r = gallery.get("5").unwrap();
        assert_eq!(r.media, "data:x;base64,");
        assert_eq!(r.thumbnail, "");
        assert_eq!(r.duration_seconds, 4.0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut gallery = GalleryStore::load(Arc::new(MemoryBlobStore::new())).unwrap();
        gallery.append(record(7, 1.0)).unwrap();
        assert_eq!(
            gallery.append(record(7, 2.0)),
            Err(AppError::DuplicateRecord("7".to_string()))
        );
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let mut gallery = GalleryStore::load(Arc::new(FailingStore)).unwrap();
        assert!(matches!(gallery.append(record(1, 1.0)), Err(AppError::Storage(_))));
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_cards() {
        let mut gallery = GalleryStore::load(Arc::new(MemoryBlobStore::new())).unwrap();
        assert!(gallery.cards().is_empty());

        let mut no_thumb = record(1_700_000_000_000, 2.6);
        no_thumb.thumbnail.clear();
        gallery.append(no_thumb).unwrap();

        let cards = gallery.cards();
        assert_eq!(cards[0].duration_label, "3s");
        assert_eq!(cards[0].thumbnail, None);
        assert!(!cards[0].date_label.is_empty());
    }
}
