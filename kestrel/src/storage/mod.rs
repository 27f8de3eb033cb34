// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! File backed per-client durable session state.
//!
//! Layout below the configured root:
//!
//! ```txt
//! <root>/<bucket>/<client-id-encoded>/
//!     subs/<filter-encoded>         granted QoS as one ASCII digit
//!     queue/<seq>-<qos>-<pkgid>     body is `topic NUL payload`
//!     queue/<seq>-<qos>-<pkgid>.rel QoS 2 flow reached PUBREC
//!     pkgids/<id>                   reserved outbound packet ids
//!     will                          will descriptor
//! ```
//!
//! The bucket is picked by the low bits of a stable hash over the client id,
//! bounding directory fan-out. Client ids and topic filters are percent
//! encoded so `/` and other unsafe bytes never reach the filesystem. All
//! writes go to a temporary name first and are renamed into place; readers
//! drop entries that fail validation.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use codec::{PacketId, QoS};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

mod encode;

pub use encode::{decode_name, encode_name};

const SUBS_DIR: &str = "subs";
const QUEUE_DIR: &str = "queue";
const PKGIDS_DIR: &str = "pkgids";
const WILL_FILE: &str = "will";
const TMP_SUFFIX: &str = ".tmp";
const REL_SUFFIX: &str = ".rel";

/// Opaque handle of a stored queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHandle(PathBuf);

/// One stored message read back from the queue directory.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub seq: u64,
    pub qos: QoS,
    pub packet_id: PacketId,
    pub topic: String,
    pub payload: Vec<u8>,

    /// The outbound QoS 2 flow of this entry already saw PUBREC; on
    /// session resume only a PUBREL needs to be re-sent.
    pub released: bool,

    pub handle: MsgHandle,
}

/// Stored will descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Per-domain session store rooted at one directory.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    bucket_mask: u64,

    /// Next queue sequence number per client, recovered by scanning on
    /// first use.
    next_seq: HashMap<String, u64>,
}

/// Stable string hash (djb2); must not change across restarts because it
/// picks the on-disk bucket.
fn stable_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(b));
    }
    hash
}

fn qos_to_digit(qos: QoS) -> u8 {
    b'0' + qos as u8
}

fn qos_from_digit(b: u8) -> Option<QoS> {
    match b {
        b'0' => Some(QoS::AtMostOnce),
        b'1' => Some(QoS::AtLeastOnce),
        b'2' => Some(QoS::ExactOnce),
        _ => None,
    }
}

fn storage_err(message: String) -> Error {
    Error::from_string(ErrorKind::StorageError, message)
}

/// Write `content` to `path` atomically via a temporary file plus rename.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    {
        let mut fd = fs::File::create(&tmp)
            .map_err(|err| storage_err(format!("Failed to create {tmp:?}, err: {err}")))?;
        fd.write_all(content)
            .map_err(|err| storage_err(format!("Failed to write {tmp:?}, err: {err}")))?;
    }
    fs::rename(&tmp, path)
        .map_err(|err| storage_err(format!("Failed to rename {tmp:?} to {path:?}, err: {err}")))
}

impl Storage {
    /// Create a store rooted at `root` with `bucket_count` hash buckets.
    ///
    /// # Errors
    ///
    /// Returns error if `bucket_count` is not a power of two.
    pub fn new<P: Into<PathBuf>>(root: P, bucket_count: usize) -> Result<Self, Error> {
        if bucket_count == 0 || !bucket_count.is_power_of_two() {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("bucket_count must be a power of two, got {bucket_count}"),
            ));
        }
        Ok(Self {
            root: root.into(),
            bucket_mask: (bucket_count - 1) as u64,
            next_seq: HashMap::new(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn client_dir(&self, client_id: &str) -> PathBuf {
        let bucket = stable_hash(client_id) & self.bucket_mask;
        self.root
            .join(bucket.to_string())
            .join(encode_name(client_id))
    }

    /// Whether this client has stored session state.
    #[must_use]
    pub fn session_exists(&self, client_id: &str) -> bool {
        self.client_dir(client_id).join(SUBS_DIR).is_dir()
    }

    /// Create the directory tree of a client; idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if directories cannot be created.
    pub fn init(&mut self, client_id: &str) -> Result<(), Error> {
        let dir = self.client_dir(client_id);
        for sub in [SUBS_DIR, QUEUE_DIR, PKGIDS_DIR] {
            fs::create_dir_all(dir.join(sub))
                .map_err(|err| storage_err(format!("Failed to create {dir:?}, err: {err}")))?;
        }
        if !self.next_seq.contains_key(client_id) {
            let next = self.scan_max_seq(client_id)?.map_or(0, |max| max + 1);
            self.next_seq.insert(client_id.to_string(), next);
        }
        Ok(())
    }

    /// Remove all stored state of a client; used for `clean_session=true`
    /// connects.
    ///
    /// # Errors
    ///
    /// Returns error if the directory exists but cannot be removed.
    pub fn purge(&mut self, client_id: &str) -> Result<(), Error> {
        self.next_seq.remove(client_id);
        let dir = self.client_dir(client_id);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)
                .map_err(|err| storage_err(format!("Failed to remove {dir:?}, err: {err}")))?;
        }
        Ok(())
    }

    /// Persist a subscription, replacing any previous entry for the same
    /// filter.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub fn subscribe(&self, client_id: &str, filter: &str, qos: QoS) -> Result<(), Error> {
        let path = self
            .client_dir(client_id)
            .join(SUBS_DIR)
            .join(encode_name(filter));
        atomic_write(&path, &[qos_to_digit(qos)])
    }

    /// Remove a persisted subscription; absent entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure other than the file being absent.
    pub fn unsubscribe(&self, client_id: &str, filter: &str) -> Result<(), Error> {
        let path = self
            .client_dir(client_id)
            .join(SUBS_DIR)
            .join(encode_name(filter));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(format!(
                "Failed to remove {path:?}, err: {err}"
            ))),
        }
    }

    /// Load all persisted subscriptions of a client.
    ///
    /// # Errors
    ///
    /// Returns error if the subs directory cannot be read.
    pub fn subscriptions(&self, client_id: &str) -> Result<Vec<(String, QoS)>, Error> {
        let dir = self.client_dir(client_id).join(SUBS_DIR);
        let mut subs = Vec::new();
        if !dir.is_dir() {
            return Ok(subs);
        }
        let entries = fs::read_dir(&dir)
            .map_err(|err| storage_err(format!("Failed to read {dir:?}, err: {err}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|err| storage_err(format!("Failed to read {dir:?}, err: {err}")))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let Some(filter) = decode_name(name) else {
                log::warn!("storage: dropping invalid subscription entry {name:?}");
                continue;
            };
            let content = fs::read(entry.path()).unwrap_or_default();
            let Some(qos) = content.first().copied().and_then(qos_from_digit) else {
                log::warn!("storage: dropping truncated subscription entry {name:?}");
                let _ = fs::remove_file(entry.path());
                continue;
            };
            subs.push((filter, qos));
        }
        Ok(subs)
    }

    fn queue_dir(&self, client_id: &str) -> PathBuf {
        self.client_dir(client_id).join(QUEUE_DIR)
    }

    fn scan_max_seq(&self, client_id: &str) -> Result<Option<u64>, Error> {
        let dir = self.queue_dir(client_id);
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut max = None;
        let entries = fs::read_dir(&dir)
            .map_err(|err| storage_err(format!("Failed to read {dir:?}, err: {err}")))?;
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if let Some((seq, _, _)) = parse_queue_name(name) {
                    max = Some(max.map_or(seq, |m: u64| m.max(seq)));
                }
            }
        }
        Ok(max)
    }

    /// Atomically store a queued or in-flight message.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub fn store_msg(
        &mut self,
        client_id: &str,
        packet_id: PacketId,
        qos: QoS,
        topic: &str,
        payload: &[u8],
    ) -> Result<MsgHandle, Error> {
        let seq = self.next_seq.entry(client_id.to_string()).or_insert(0);
        let name = format!("{:020}-{}-{}", *seq, qos as u8, packet_id.value());
        *seq += 1;

        let path = self.queue_dir(client_id).join(name);
        let mut body = Vec::with_capacity(topic.len() + 1 + payload.len());
        body.extend_from_slice(topic.as_bytes());
        body.push(0);
        body.extend_from_slice(payload);
        atomic_write(&path, &body)?;
        Ok(MsgHandle(path))
    }

    /// Remove a queue entry and its release marker.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure other than the entry being absent.
    pub fn release_msg(&self, handle: &MsgHandle) -> Result<(), Error> {
        let mut rel = handle.0.as_os_str().to_owned();
        rel.push(REL_SUFFIX);
        let _ = fs::remove_file(PathBuf::from(rel));
        match fs::remove_file(&handle.0) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_err(format!(
                "Failed to remove {:?}, err: {err}",
                handle.0
            ))),
        }
    }

    /// Record that the outbound QoS 2 flow of this entry saw PUBREC, so a
    /// session resume re-sends PUBREL instead of the whole message.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub fn mark_msg_released(&self, handle: &MsgHandle) -> Result<(), Error> {
        let mut rel = handle.0.as_os_str().to_owned();
        rel.push(REL_SUFFIX);
        atomic_write(&PathBuf::from(rel), &[])
    }

    /// Load queued messages of a client in stored FIFO order.
    ///
    /// # Errors
    ///
    /// Returns error if the queue directory cannot be read.
    pub fn queued_messages(&self, client_id: &str) -> Result<Vec<QueuedMessage>, Error> {
        let dir = self.queue_dir(client_id);
        let mut messages = Vec::new();
        if !dir.is_dir() {
            return Ok(messages);
        }
        let entries = fs::read_dir(&dir)
            .map_err(|err| storage_err(format!("Failed to read {dir:?}, err: {err}")))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) || name.ends_with(REL_SUFFIX) {
                continue;
            }
            let Some((seq, qos, packet_id)) = parse_queue_name(name) else {
                log::warn!("storage: dropping invalid queue entry {name:?}");
                let _ = fs::remove_file(entry.path());
                continue;
            };
            let path = entry.path();
            let body = fs::read(&path).unwrap_or_default();
            let Some(nul) = body.iter().position(|b| *b == 0) else {
                log::warn!("storage: dropping truncated queue entry {name:?}");
                let _ = fs::remove_file(&path);
                continue;
            };
            let Ok(topic) = String::from_utf8(body[..nul].to_vec()) else {
                log::warn!("storage: dropping queue entry with invalid topic {name:?}");
                let _ = fs::remove_file(&path);
                continue;
            };
            let payload = body[nul + 1..].to_vec();

            let mut rel = path.as_os_str().to_owned();
            rel.push(REL_SUFFIX);
            let released = PathBuf::from(rel).exists();

            messages.push(QueuedMessage {
                seq,
                qos,
                packet_id,
                topic,
                payload,
                released,
                handle: MsgHandle(path),
            });
        }
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }

    /// Count of stored messages awaiting delivery.
    #[must_use]
    pub fn queued_count(&self, client_id: &str) -> usize {
        let dir = self.queue_dir(client_id);
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| parse_queue_name(name).is_some())
            })
            .count()
    }

    /// Total bytes of stored messages, for the per-client storage quota.
    #[must_use]
    pub fn queued_bytes(&self, client_id: &str) -> u64 {
        let dir = self.queue_dir(client_id);
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| parse_queue_name(name).is_some())
            })
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    /// Atomically reserve an outbound packet id.
    ///
    /// # Errors
    ///
    /// Returns error with kind `StorageError` if the id is already
    /// reserved or on I/O failure.
    pub fn lock_pkgid(&self, client_id: &str, packet_id: PacketId) -> Result<(), Error> {
        let path = self
            .client_dir(client_id)
            .join(PKGIDS_DIR)
            .join(packet_id.value().to_string());
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_fd) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(storage_err(
                format!("packet id {} already reserved", packet_id.value()),
            )),
            Err(err) => Err(storage_err(format!(
                "Failed to create {path:?}, err: {err}"
            ))),
        }
    }

    /// Release an outbound packet id reservation.
    pub fn release_pkgid(&self, client_id: &str, packet_id: PacketId) {
        let path = self
            .client_dir(client_id)
            .join(PKGIDS_DIR)
            .join(packet_id.value().to_string());
        let _ = fs::remove_file(path);
    }

    /// All currently reserved outbound packet ids of a client.
    #[must_use]
    pub fn locked_pkgids(&self, client_id: &str) -> HashSet<u16> {
        let dir = self.client_dir(client_id).join(PKGIDS_DIR);
        let Ok(entries) = fs::read_dir(dir) else {
            return HashSet::new();
        };
        entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect()
    }

    /// Persist the will descriptor of a durable session.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub fn store_will(&self, client_id: &str, will: &StoredWill) -> Result<(), Error> {
        let path = self.client_dir(client_id).join(WILL_FILE);
        let mut body = Vec::with_capacity(4 + will.topic.len() + will.message.len());
        #[allow(clippy::cast_possible_truncation)]
        body.write_u16::<BigEndian>(will.topic.len() as u16)
            .map_err(|err| storage_err(format!("Failed to encode will, err: {err}")))?;
        body.extend_from_slice(will.topic.as_bytes());
        body.push(will.qos as u8);
        body.push(u8::from(will.retain));
        body.extend_from_slice(&will.message);
        atomic_write(&path, &body)
    }

    /// Load the stored will descriptor, discarding it if malformed.
    #[must_use]
    pub fn load_will(&self, client_id: &str) -> Option<StoredWill> {
        let path = self.client_dir(client_id).join(WILL_FILE);
        let body = fs::read(&path).ok()?;
        if body.len() < 2 {
            let _ = fs::remove_file(&path);
            return None;
        }
        let topic_len = usize::from(BigEndian::read_u16(&body[..2]));
        if body.len() < 2 + topic_len + 2 {
            let _ = fs::remove_file(&path);
            return None;
        }
        let Ok(topic) = String::from_utf8(body[2..2 + topic_len].to_vec()) else {
            let _ = fs::remove_file(&path);
            return None;
        };
        let qos = qos_from_digit(b'0' + body[2 + topic_len])?;
        let retain = body[2 + topic_len + 1] != 0;
        let message = body[2 + topic_len + 2..].to_vec();
        Some(StoredWill {
            topic,
            message,
            qos,
            retain,
        })
    }

    /// Remove the stored will descriptor.
    pub fn clear_will(&self, client_id: &str) {
        let _ = fs::remove_file(self.client_dir(client_id).join(WILL_FILE));
    }
}

/// Parse a `<seq>-<qos>-<pkgid>` queue file name.
fn parse_queue_name(name: &str) -> Option<(u64, QoS, PacketId)> {
    let mut parts = name.splitn(3, '-');
    let seq: u64 = parts.next()?.parse().ok()?;
    let qos_part = parts.next()?;
    if qos_part.len() != 1 {
        return None;
    }
    let qos = qos_from_digit(qos_part.as_bytes()[0])?;
    let packet_id: u16 = parts.next()?.parse().ok()?;
    Some((seq, qos, PacketId::new(packet_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::utils::random_string;

    fn new_storage() -> Storage {
        let root = std::env::temp_dir()
            .join("kestrel-tests")
            .join(format!("storage-{}", random_string(8)));
        Storage::new(root, 16).unwrap()
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut storage = new_storage();
        storage.init("client-a").unwrap();
        storage.init("client-a").unwrap();
        assert!(storage.session_exists("client-a"));
        assert!(!storage.session_exists("client-b"));
        storage.purge("client-a").unwrap();
    }

    #[test]
    fn test_subscriptions_round_trip() {
        let mut storage = new_storage();
        storage.init("client-a").unwrap();

        storage
            .subscribe("client-a", "sport/tennis/#", QoS::AtLeastOnce)
            .unwrap();
        storage.subscribe("client-a", "a/+/c", QoS::ExactOnce).unwrap();
        // Replace keeps one entry per filter.
        storage
            .subscribe("client-a", "sport/tennis/#", QoS::ExactOnce)
            .unwrap();

        let mut subs = storage.subscriptions("client-a").unwrap();
        subs.sort();
        assert_eq!(
            subs,
            vec![
                ("a/+/c".to_string(), QoS::ExactOnce),
                ("sport/tennis/#".to_string(), QoS::ExactOnce),
            ]
        );

        storage.unsubscribe("client-a", "a/+/c").unwrap();
        // Removing twice is a no-op.
        storage.unsubscribe("client-a", "a/+/c").unwrap();
        assert_eq!(storage.subscriptions("client-a").unwrap().len(), 1);
        storage.purge("client-a").unwrap();
    }

    #[test]
    fn test_queue_fifo_order() {
        let mut storage = new_storage();
        storage.init("client-q").unwrap();

        for i in 1..=5_u16 {
            storage
                .store_msg(
                    "client-q",
                    PacketId::new(i),
                    QoS::ExactOnce,
                    "chat/room1",
                    i.to_string().as_bytes(),
                )
                .unwrap();
        }
        assert_eq!(storage.queued_count("client-q"), 5);

        let messages = storage.queued_messages("client-q").unwrap();
        let payloads: Vec<String> = messages
            .iter()
            .map(|m| String::from_utf8(m.payload.clone()).unwrap())
            .collect();
        assert_eq!(payloads, vec!["1", "2", "3", "4", "5"]);
        assert!(messages.iter().all(|m| m.qos == QoS::ExactOnce));
        assert!(messages.iter().all(|m| !m.released));

        storage.release_msg(&messages[0].handle).unwrap();
        assert_eq!(storage.queued_count("client-q"), 4);
        storage.purge("client-q").unwrap();
    }

    #[test]
    fn test_release_marker() {
        let mut storage = new_storage();
        storage.init("client-r").unwrap();
        let handle = storage
            .store_msg("client-r", PacketId::new(7), QoS::ExactOnce, "t", b"x")
            .unwrap();
        storage.mark_msg_released(&handle).unwrap();

        let messages = storage.queued_messages("client-r").unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].released);

        storage.release_msg(&handle).unwrap();
        assert!(storage.queued_messages("client-r").unwrap().is_empty());
        storage.purge("client-r").unwrap();
    }

    #[test]
    fn test_pkgid_locks() {
        let mut storage = new_storage();
        storage.init("client-p").unwrap();

        storage.lock_pkgid("client-p", PacketId::new(1)).unwrap();
        assert!(storage.lock_pkgid("client-p", PacketId::new(1)).is_err());
        storage.lock_pkgid("client-p", PacketId::new(2)).unwrap();
        assert_eq!(
            storage.locked_pkgids("client-p"),
            [1, 2].into_iter().collect()
        );

        storage.release_pkgid("client-p", PacketId::new(1));
        assert_eq!(storage.locked_pkgids("client-p"), [2].into_iter().collect());
        storage.purge("client-p").unwrap();
    }

    #[test]
    fn test_will_round_trip() {
        let mut storage = new_storage();
        storage.init("client-w").unwrap();

        let will = StoredWill {
            topic: "last/will".to_string(),
            message: b"bye".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        storage.store_will("client-w", &will).unwrap();
        assert_eq!(storage.load_will("client-w"), Some(will));

        storage.clear_will("client-w");
        assert_eq!(storage.load_will("client-w"), None);
        storage.purge("client-w").unwrap();
    }

    #[test]
    fn test_seq_continues_after_reopen() {
        let root = std::env::temp_dir()
            .join("kestrel-tests")
            .join(format!("storage-{}", random_string(8)));

        let mut storage = Storage::new(&root, 16).unwrap();
        storage.init("client-s").unwrap();
        storage
            .store_msg("client-s", PacketId::new(1), QoS::AtLeastOnce, "a", b"1")
            .unwrap();

        // A fresh store over the same root keeps appending after the
        // existing entries.
        let mut storage = Storage::new(&root, 16).unwrap();
        storage.init("client-s").unwrap();
        storage
            .store_msg("client-s", PacketId::new(2), QoS::AtLeastOnce, "a", b"2")
            .unwrap();

        let messages = storage.queued_messages("client-s").unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].seq < messages[1].seq);
        storage.purge("client-s").unwrap();
    }

    #[test]
    fn test_encoded_client_id() {
        let mut storage = new_storage();
        // Client ids with path separators and NUL bytes must not escape
        // their directory.
        storage.init("weird/../id\u{0}x").unwrap();
        storage
            .subscribe("weird/../id\u{0}x", "a/b", QoS::AtMostOnce)
            .unwrap();
        let subs = storage.subscriptions("weird/../id\u{0}x").unwrap();
        assert_eq!(subs, vec![("a/b".to_string(), QoS::AtMostOnce)]);
        storage.purge("weird/../id\u{0}x").unwrap();
    }
}
