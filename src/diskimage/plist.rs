// src/diskimage/plist.rs

//! Minimal reader for the attach tool's property-list output
//!
//! `hdiutil attach -plist` prints an XML plist whose `system-entities` array
//! holds one dict per attached device; only entries backed by a mounted
//! filesystem carry a `mount-point` key. We only need those values, so this
//! is a key/value scan rather than a full plist model.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::{Path, PathBuf};

/// A `<key>` followed by a `<string>` value
///
/// `value` is `None` when the text could not be unescaped.
struct Entry {
    key: String,
    value: Option<String>,
}

/// Extract every `mount-point` string from a plist document
///
/// Anything printed before the document (license text, progress lines) is
/// skipped.
pub fn parse_mount_points(xml: &[u8]) -> Result<Vec<PathBuf>, String> {
    let mut mount_points = Vec::new();
    for entry in string_entries(xml)? {
        if entry.key != "mount-point" {
            continue;
        }
        let value = entry
            .value
            .ok_or_else(|| "mount-point value is not valid XML text".to_string())?;
        mount_points.push(PathBuf::from(value));
    }
    Ok(mount_points)
}

/// Whole-disk devices attached from `image`, from `hdiutil info -plist`
///
/// Each image dict lists `image-path` before its `system-entities`; the first
/// `dev-entry` of an image is the whole disk, and detaching it detaches every
/// partition.
pub fn attached_devices(xml: &[u8], image: &Path) -> Result<Vec<PathBuf>, String> {
    let mut devices = Vec::new();
    let mut matching = false;
    for entry in string_entries(xml)? {
        match entry.key.as_str() {
            "image-path" => {
                matching = entry.value.as_deref().is_some_and(|v| Path::new(v) == image);
                if matching {
                    devices.push(None);
                }
            }
            "dev-entry" if matching => {
                if let Some(slot) = devices.last_mut()
                    && slot.is_none()
                {
                    *slot = entry.value.map(PathBuf::from);
                }
            }
            _ => {}
        }
    }
    Ok(devices.into_iter().flatten().collect())
}

/// Offset of the XML document inside the tool's stdout
fn document_start(xml: &[u8]) -> usize {
    [b"<?xml".as_slice(), b"<plist".as_slice()]
        .iter()
        .filter_map(|marker| xml.windows(marker.len()).position(|w| w == *marker))
        .min()
        .unwrap_or(0)
}

/// Every key/string pair of the document, in order
fn string_entries(xml: &[u8]) -> Result<Vec<Entry>, String> {
    let mut reader = Reader::from_reader(&xml[document_start(xml)..]);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut last_key: Option<String> = None;
    let mut in_key = false;
    let mut in_string = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"key" => in_key = true,
                b"string" => in_string = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"key" => in_key = false,
                b"string" => {
                    in_string = false;
                    last_key = None;
                }
                _ => {}
            },
            Ok(Event::Text(text)) => {
                let value = text.unescape().ok().map(|v| v.into_owned());
                if in_key {
                    last_key = value;
                } else if in_string && let Some(key) = last_key.take() {
                    entries.push(Entry { key, value });
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "malformed plist at {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
        }
        buf.clear();
    }

    Ok(entries)
}
