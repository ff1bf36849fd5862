//! XML ledger of grants and trusted networks.
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8" standalone="yes"?>
//! <keyStore version="1">
//!     <adbKey key="QAAAA... user@host" lastConnection="1700000000000"/>
//!     <wifiAP bssid="aa:bb:cc:dd:ee:ff"/>
//! </keyStore>
//! ```
//!
//! Older files have no `keyStore` wrapper and list `adbKey`/`wifiAP`
//! elements at the top level. Both shapes load; only the wrapped one is
//! written.

use crate::{AuthorizationEntries, StorageError, StorageResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use safe_file_ops::AtomicFile;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

pub const KEYSTORE_VERSION: i64 = 1;
pub const MAX_SUPPORTED_KEYSTORE_VERSION: i64 = 1;

const KEYSTORE_TAG: &str = "keyStore";
const VERSION_ATTR: &str = "version";
const ADB_KEY_TAG: &str = "adbKey";
const KEY_ATTR: &str = "key";
const LAST_CONNECTION_ATTR: &str = "lastConnection";
const WIFI_AP_TAG: &str = "wifiAP";
const BSSID_ATTR: &str = "bssid";

#[derive(Debug, Clone)]
pub struct AuthorizationLedgerStorage {
    file: AtomicFile,
}

impl AuthorizationLedgerStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: AtomicFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Load the ledger. Any failure yields empty entries.
    pub fn load(&self) -> AuthorizationEntries {
        let content = match self.file.read_to_string() {
            Ok(Some(content)) => content,
            Ok(None) => return AuthorizationEntries::new(),
            Err(e) => {
                error!(path = %self.path().display(), error = %e, "Failed to read ledger");
                return AuthorizationEntries::new();
            }
        };

        match parse_ledger(&content) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %self.path().display(), error = %e, "Failed to parse ledger");
                AuthorizationEntries::new()
            }
        }
    }

    /// Persist `entries`, or delete the file when there is nothing to keep.
    pub fn save(&self, entries: &AuthorizationEntries) {
        if entries.is_empty() {
            self.delete();
            return;
        }
        if let Err(e) = self.try_save(entries) {
            error!(path = %self.path().display(), error = %e, "Failed to write ledger");
        }
    }

    pub fn delete(&self) {
        match self.file.delete() {
            Ok(true) => debug!(path = %self.path().display(), "Deleted ledger"),
            Ok(false) => {}
            Err(e) => error!(path = %self.path().display(), error = %e, "Failed to delete ledger"),
        }
    }

    fn try_save(&self, entries: &AuthorizationEntries) -> StorageResult<()> {
        let document = render_ledger(entries)?;
        let mut staged = self.file.start_write()?;
        if let Err(e) = staged.write_all(&document) {
            staged.fail();
            return Err(e.into());
        }
        staged.finish()?;
        Ok(())
    }
}

// ============================================================================
// Writing
// ============================================================================

fn render_ledger(entries: &AuthorizationEntries) -> StorageResult<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))
        .map_err(StorageError::xml)?;

    let version = KEYSTORE_VERSION.to_string();
    let mut root = BytesStart::new(KEYSTORE_TAG);
    root.push_attribute((VERSION_ATTR, version.as_str()));
    writer
        .write_event(Event::Start(root))
        .map_err(StorageError::xml)?;

    for (key, last_connection) in &entries.grants {
        let last_connection = last_connection.to_string();
        let mut element = BytesStart::new(ADB_KEY_TAG);
        element.push_attribute((KEY_ATTR, key.as_str()));
        element.push_attribute((LAST_CONNECTION_ATTR, last_connection.as_str()));
        writer
            .write_event(Event::Empty(element))
            .map_err(StorageError::xml)?;
    }

    for bssid in &entries.trusted_networks {
        let mut element = BytesStart::new(WIFI_AP_TAG);
        element.push_attribute((BSSID_ATTR, bssid.as_str()));
        writer
            .write_event(Event::Empty(element))
            .map_err(StorageError::xml)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(KEYSTORE_TAG)))
        .map_err(StorageError::xml)?;

    let mut document = writer.into_inner();
    document.push(b'\n');
    Ok(document)
}

// ============================================================================
// Reading
// ============================================================================

/// One element of the document, flattened with its nesting depth.
#[derive(Debug)]
struct Element {
    depth: usize,
    name: String,
    attrs: BTreeMap<String, String>,
}

fn parse_ledger(content: &str) -> StorageResult<AuthorizationEntries> {
    let elements = flatten(content)?;

    match versioned_root(&elements) {
        Some(version) if version > MAX_SUPPORTED_KEYSTORE_VERSION => {
            Err(StorageError::UnsupportedVersion {
                found: version,
                max: MAX_SUPPORTED_KEYSTORE_VERSION,
            })
        }
        Some(_) => Ok(collect_entries(
            elements.iter().skip(1).filter(|e| e.depth == 1),
        )),
        None => {
            debug!("Ledger has no versioned root, reading legacy layout");
            Ok(collect_entries(elements.iter().filter(|e| e.depth == 0)))
        }
    }
}

/// Version of a well-formed `keyStore` root, if the document has one.
fn versioned_root(elements: &[Element]) -> Option<i64> {
    let root = elements.first()?;
    if root.name != KEYSTORE_TAG {
        return None;
    }
    root.attrs.get(VERSION_ATTR)?.trim().parse::<i64>().ok()
}

fn collect_entries<'a>(elements: impl Iterator<Item = &'a Element>) -> AuthorizationEntries {
    let mut entries = AuthorizationEntries::new();
    for element in elements {
        match element.name.as_str() {
            ADB_KEY_TAG => {
                let key = element.attrs.get(KEY_ATTR);
                let last_connection = element
                    .attrs
                    .get(LAST_CONNECTION_ATTR)
                    .and_then(|raw| raw.trim().parse::<i64>().ok());
                match (key, last_connection) {
                    (Some(key), Some(time)) => {
                        entries.grants.insert(key.clone(), time);
                    }
                    _ => warn!("Dropping adbKey entry without a valid key and lastConnection"),
                }
            }
            WIFI_AP_TAG => match element.attrs.get(BSSID_ATTR) {
                Some(bssid) => {
                    entries.trusted_networks.insert(bssid.clone());
                }
                None => warn!("Dropping wifiAP entry without a bssid"),
            },
            other => warn!(tag = %other, "Ignoring unrecognized ledger tag"),
        }
    }
    entries
}

fn flatten(content: &str) -> StorageResult<Vec<Element>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut elements = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(StorageError::xml)? {
            Event::Start(start) => {
                elements.push(element_from(&start, depth)?);
                depth += 1;
            }
            Event::Empty(start) => {
                elements.push(element_from(&start, depth)?);
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(elements)
}

fn element_from(start: &BytesStart<'_>, depth: usize) -> StorageResult<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(StorageError::xml)?;
        let attr_name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(StorageError::xml)?;
        attrs.insert(attr_name, value.into_owned());
    }
    Ok(Element { depth, name, attrs })
}
