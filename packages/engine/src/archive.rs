// ABOUTME: Tar archive transport for copying into and out of containers
// ABOUTME: Builds single-entry archives and scans inbound archives for a named entry

use crate::stream::ByteReader;
use crate::{EngineError, Result};
use futures::StreamExt;
use std::io::Cursor;
use tar::{EntryType, Header};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

/// Size of a tar header and of the padding unit for entry bodies
pub const BLOCK_SIZE: u64 = 512;

/// Permission bits for files and directories created in a container
pub const DEFAULT_MODE: u32 = 0o755;

/// Two zero blocks terminate an archive
const END_OF_ARCHIVE: u64 = 2 * BLOCK_SIZE;

fn padding(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

fn entry_header(entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header
}

/// Header blocks for an entry called `name`, including any GNU long-name
/// record the name needs. The entry body is left to the caller.
fn header_blocks(name: &str, entry_type: EntryType, size: u64, mode: u32) -> Result<Vec<u8>> {
    let mut header = entry_header(entry_type, size, mode);
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, name, std::io::empty())
        .map_err(|e| EngineError::Archive(format!("invalid entry name {}: {}", name, e)))?;
    Ok(std::mem::take(builder.get_mut()))
}

/// Last segment of a slash-separated container path
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parent directory of a slash-separated container path
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(index) => &trimmed[..index],
        None => ".",
    }
}

/// Wrap `body` as a one-entry archive holding a regular file called `name`.
///
/// The body is streamed, not buffered: the archive is the entry's header
/// blocks, then exactly `size` bytes of `body`, then padding and the
/// end-of-archive marker.
pub fn file_archive<R>(name: &str, body: R, size: u64, mode: u32) -> Result<ByteReader>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let headers = header_blocks(name, EntryType::Regular, size, mode)?;
    let trailer = vec![0u8; (padding(size) + END_OF_ARCHIVE) as usize];

    let archive = Cursor::new(headers)
        .chain(body.take(size))
        .chain(Cursor::new(trailer));
    Ok(Box::new(archive))
}

/// Build a complete archive holding a single empty directory called `name`
pub fn directory_archive(name: &str, mode: u32) -> Result<Vec<u8>> {
    let mut header = entry_header(EntryType::Directory, 0, mode);
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, name, std::io::empty())
        .map_err(|e| EngineError::Archive(format!("invalid entry name {}: {}", name, e)))?;
    Ok(builder.into_inner()?)
}

/// Read through `archive` until an entry called `name` starts.
///
/// Returns the entry's declared size and a reader limited to the entry body;
/// the rest of the archive is never read. Long names recorded as GNU or PAX
/// extensions are matched in full. Fails with [`EngineError::EntryNotFound`]
/// when the archive ends first.
pub async fn find_entry(
    name: &str,
    source_path: &str,
    archive: ByteReader,
) -> Result<(u64, ByteReader)> {
    let wanted = name.trim_end_matches('/').as_bytes();
    let archive = async_tar::Archive::new(archive.compat());
    let mut entries = Box::pin(archive.entries()?);

    while let Some(entry) = entries.next().await {
        let entry = entry?;
        let matches = {
            let path = entry.path_bytes();
            let entry_name = path.strip_prefix(b"./").unwrap_or(&path[..]);
            entry_name.strip_suffix(b"/").unwrap_or(entry_name) == wanted
        };
        if !matches {
            continue;
        }

        let size = entry.header().size()?;
        return Ok((size, Box::new(Box::pin(entry).compat())));
    }

    Err(EngineError::EntryNotFound {
        name: name.to_string(),
        path: source_path.to_string(),
    })
}
