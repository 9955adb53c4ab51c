//! Cross-platform system clipboard access

use std::time::Duration;
use tokio::sync::mpsc;
use arboard::Clipboard as ArboardClipboard;

use crate::group::ContentHash;
use crate::{Error, Result};

pub const TEXT_PLAIN: &str = "text/plain";

/// Clipboard manager for reading, writing, and monitoring changes
pub struct ClipboardManager {
    /// Last known content hash (for change detection)
    last_hash: Option<ContentHash>,
}

impl ClipboardManager {
    pub fn new() -> Self {
        Self { last_hash: None }
    }

    /// Read the current clipboard as `(mime type, bytes)`
    pub fn read(&self) -> Result<Option<(String, Vec<u8>)>> {
        let mut clipboard = ArboardClipboard::new()
            .map_err(|e| Error::Clipboard(e.to_string()))?;

        match clipboard.get_text() {
            Ok(text) if !text.is_empty() => Ok(Some((TEXT_PLAIN.to_string(), text.into_bytes()))),
            Ok(_) => Ok(None),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(Error::Clipboard(e.to_string())),
        }
    }

    /// Write content to the clipboard. Only text is supported.
    pub fn write(&self, mime_type: &str, data: &[u8]) -> Result<()> {
        let text = text_payload(mime_type, data)?;
        let mut clipboard = ArboardClipboard::new()
            .map_err(|e| Error::Clipboard(e.to_string()))?;
        clipboard.set_text(text)
            .map_err(|e| Error::Clipboard(e.to_string()))
    }

    /// Check if clipboard content has changed since last check
    pub fn check_change(&mut self) -> Result<Option<ClipboardChange>> {
        match self.read()? {
            Some((mime_type, data)) => {
                let hash = ContentHash::of(&mime_type, &data);
                if self.last_hash.as_ref() != Some(&hash) {
                    self.last_hash = Some(hash);
                    Ok(Some(ClipboardChange { mime_type, data, hash }))
                } else {
                    Ok(None)
                }
            }
            None => {
                self.last_hash = None;
                Ok(None)
            }
        }
    }
}

impl Default for ClipboardManager {
    fn default() -> Self {
        Self::new()
    }
}

fn text_payload<'a>(mime_type: &str, data: &'a [u8]) -> Result<&'a str> {
    if !mime_type.starts_with("text/") {
        return Err(Error::Clipboard(format!("unsupported content type {}", mime_type)));
    }
    std::str::from_utf8(data).map_err(|_| Error::Clipboard("text is not valid UTF-8".to_string()))
}

/// Clipboard change event
#[derive(Debug, Clone)]
pub struct ClipboardChange {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub hash: ContentHash,
}

/// Start a clipboard monitoring task that sends changes to a channel
pub fn start_monitor(
    poll_interval: Duration,
) -> (mpsc::Receiver<ClipboardChange>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);

    let handle = tokio::spawn(async move {
        let mut manager = ClipboardManager::new();

        loop {
            tokio::time::sleep(poll_interval).await;

            match manager.check_change() {
                Ok(Some(change)) => {
                    if tx.send(change).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("clipboard read error: {}", e);
                }
            }
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipboard_roundtrip() {
        let manager = ClipboardManager::new();

        // No clipboard in headless environments
        if manager.write(TEXT_PLAIN, b"clipmesh test").is_ok() {
            if let Ok(Some((mime, data))) = manager.read() {
                assert_eq!(mime, TEXT_PLAIN);
                assert_eq!(data, b"clipmesh test");
            }
        }
    }

    #[test]
    fn test_only_text_is_written() {
        assert!(text_payload("image/png", &[0x89, 0x50]).is_err());
        assert!(text_payload(TEXT_PLAIN, &[0xFF, 0xFE]).is_err());
        assert_eq!(text_payload("text/html", b"<b>x</b>").unwrap(), "<b>x</b>");
    }
}
