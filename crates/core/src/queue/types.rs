use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::{FileRecord, Stage};

/// The two work queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Download,
    Processing,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Download => "download",
            QueueName::Processing => "processing",
        }
    }

    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Download => QueueName::Download,
            Stage::Processing => QueueName::Processing,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub file_id: String,
    pub source_locator: String,
    pub timestamp: DateTime<Utc>,
    pub satellite: String,
    pub product_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub file_id: String,
    pub raw_file_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub satellite: String,
    pub product_type: String,
}

/// A unit of work. Carries enough context to act without reading the
/// manifest first; the manifest stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueItem {
    Download(DownloadTask),
    Processing(ProcessingTask),
}

impl QueueItem {
    pub fn file_id(&self) -> &str {
        match self {
            QueueItem::Download(task) => &task.file_id,
            QueueItem::Processing(task) => &task.file_id,
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            QueueItem::Download(_) => QueueName::Download,
            QueueItem::Processing(_) => QueueName::Processing,
        }
    }

    /// Rebuild the item a record needs to run `stage`.
    ///
    /// Returns `None` for processing when no raw artifact has been recorded.
    pub fn for_stage(record: &FileRecord, stage: Stage) -> Option<Self> {
        match stage {
            Stage::Download => Some(QueueItem::Download(DownloadTask {
                file_id: record.file_id.clone(),
                source_locator: record.source_locator.clone(),
                timestamp: record.timestamp,
                satellite: record.satellite.clone(),
                product_type: record.product_type.clone(),
            })),
            Stage::Processing => {
                let raw = record.raw_file_path.as_ref()?;
                Some(QueueItem::Processing(ProcessingTask {
                    file_id: record.file_id.clone(),
                    raw_file_path: PathBuf::from(raw),
                    timestamp: record.timestamp,
                    satellite: record.satellite.clone(),
                    product_type: record.product_type.clone(),
                }))
            }
        }
    }
}

/// A claimed queue item. Must be acknowledged once handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: i64,
    pub token: String,
    /// How many times this item has been handed out, including this one.
    pub deliveries: u32,
    pub enqueued_at: DateTime<Utc>,
    pub item: QueueItem,
}

/// Snapshot of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub ready: u64,
    pub delayed: u64,
    pub in_flight: u64,
}

impl QueueDepth {
    pub fn total(&self) -> u64 {
        self.ready + self.delayed + self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_item_json_is_tagged() {
        let item = QueueItem::Download(DownloadTask {
            file_id: "F1".to_string(),
            source_locator: "https://data.example.org/F1".to_string(),
            timestamp: Utc::now(),
            satellite: "MSG4".to_string(),
            product_type: "HRSEVIRI".to_string(),
        });
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["file_id"], "F1");
        assert_eq!(item.queue(), QueueName::Download);
    }

    #[test]
    fn test_queue_name_for_stage() {
        assert_eq!(QueueName::for_stage(Stage::Download), QueueName::Download);
        assert_eq!(QueueName::for_stage(Stage::Processing).as_str(), "processing");
    }
}
