//! Tar archive transfer helpers.
//!
//! Copying into a container wraps one file into a single-entry archive the
//! daemon extracts; copying out scans the daemon's archive for the entry
//! named after the requested path and streams only that entry's bytes.

use crate::container::runtime::ArchiveDownload;
use crate::container::{ContainerError, DataStream, Result};
use bytes::Bytes;
use std::io::Read;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

/// Permission bits of files copied into a container.
pub const FILE_MODE: u32 = 0o755;

const CHUNK_SIZE: usize = 32 * 1024;
const CHUNK_QUEUE: usize = 4;

/// Build an archive holding a single regular file at `path`.
///
/// The entry name is `path` relative to `/`, so the archive must be
/// extracted at the container's root.
pub fn pack_file(path: &str, contents: &[u8], mode: u32) -> Result<Vec<u8>> {
    let name = path.trim_start_matches('/');
    if name.is_empty() {
        return Err(ContainerError::ConfigError(format!(
            "Cannot copy a file to '{}'",
            path
        )));
    }

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    Ok(builder.into_inner()?)
}

/// Name of the archive entry the runtime produces for `path`.
pub fn entry_name(path: &str) -> String {
    Path::new(path.trim_end_matches('/'))
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Find the entry called `name` in a downloaded archive and stream it.
///
/// The returned stream reads from the matched entry; closing or dropping it
/// stops the scanner and releases the underlying archive. Its size is the
/// runtime's stat size when known, the entry's header size otherwise.
///
/// # Errors
///
/// Returns [`ContainerError::ArchiveEntryNotFound`] if the archive ends
/// before an entry with that name is seen.
pub async fn extract_entry(download: ArchiveDownload, name: &str) -> Result<DataStream> {
    let ArchiveDownload {
        archive,
        stat_size,
    } = download;
    let (found_tx, found_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);

    let bridge = SyncIoBridge::new(archive);
    let target = name.to_string();
    let scanner =
        tokio::task::spawn_blocking(move || scan_archive(bridge, &target, found_tx, chunk_tx));

    let entry_size = match found_rx.await {
        Ok(found) => found?,
        Err(_) => {
            return Err(ContainerError::runtime_call(
                "download",
                "archive scanner stopped unexpectedly",
            ));
        }
    };

    let reader = StreamReader::new(ReceiverStream::new(chunk_rx));
    let mut stream = DataStream::new(reader, stat_size.unwrap_or(entry_size));
    // Dropping the reader fails the scanner's next send, which drops the archive.
    stream.on_close(move || async move {
        if let Err(e) = scanner.await {
            debug!("Archive scanner ended abnormally: {}", e);
        }
        Ok(())
    });
    Ok(stream)
}

fn scan_archive<R: Read>(
    archive: R,
    name: &str,
    found: oneshot::Sender<Result<u64>>,
    chunks: mpsc::Sender<std::io::Result<Bytes>>,
) {
    let mut tarball = tar::Archive::new(archive);
    let entries = match tarball.entries() {
        Ok(entries) => entries,
        Err(e) => {
            let _ = found.send(Err(e.into()));
            return;
        }
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let _ = found.send(Err(e.into()));
                return;
            }
        };
        let matches = entry
            .path()
            .map(|path| path == Path::new(name))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        if found.send(Ok(entry.size())).is_err() {
            return;
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match entry.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    if chunks
                        .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        debug!("Archive entry reader closed early");
                        return;
                    }
                }
                Err(e) => {
                    let _ = chunks.blocking_send(Err(e));
                    return;
                }
            }
        }
    }

    let _ = found.send(Err(ContainerError::ArchiveEntryNotFound(name.to_string())));
}
