//! Archive codec (C6): gzip-compressed CPIO "newc" streams.
//!
//! No crate in the retrieved example pack touches binary property lists or
//! CPIO, and a third-party `cpio` crate's exact API could not be verified
//! against this crate's usage without running the toolchain — so the
//! format is hand-rolled here directly from its own definition (GLOSSARY),
//! the same way the original Python implementation described it to
//! `libarchive`. Gzip framing uses `flate2`, matching `aptos-core`'s use of
//! the same crate.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 6] = b"070701";
const TRAILER_NAME: &str = "TRAILER!!!";
const REG_FILE_MODE: u32 = 0o100644;
const DIR_MODE: u32 = 0o040755;

fn hex8(n: u64) -> String {
    format!("{:08x}", n)
}

fn pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

fn write_entry<W: Write>(
    out: &mut W,
    name: &str,
    mode: u32,
    mtime: u64,
    data: &[u8],
) -> io::Result<()> {
    let name_bytes = name.as_bytes();
    let namesize = name_bytes.len() + 1; // includes NUL terminator

    out.write_all(MAGIC)?;
    for field in [
        0u64,                // ino
        mode as u64,         // mode
        0,                   // uid
        0,                   // gid
        1,                   // nlink
        mtime,               // mtime
        data.len() as u64,   // filesize
        0,                   // devmajor
        0,                   // devminor
        0,                   // rdevmajor
        0,                   // rdevminor
        namesize as u64,     // namesize
        0,                   // check
    ] {
        out.write_all(hex8(field).as_bytes())?;
    }

    out.write_all(name_bytes)?;
    out.write_all(&[0u8])?; // NUL terminator
    let header_and_name_len = 110 + namesize;
    out.write_all(&vec![0u8; pad_len(header_and_name_len)])?;

    out.write_all(data)?;
    out.write_all(&vec![0u8; pad_len(data.len())])?;

    Ok(())
}

/// Build a gzip-compressed CPIO "newc" archive containing `files`, each
/// stored at `./<basename>`. The whole archive is buffered in memory and
/// returned as a single byte vector: the sender MUST NOT use chunked
/// Transfer-Encoding (SPEC_FULL §1 Non-goal), so there is no benefit to
/// streaming its production either.
pub fn build_archive(files: &[PathBuf]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    for path in files {
        let data = std::fs::read(path)?;
        let name = format!(
            "./{}",
            path.file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no name"))?
                .to_string_lossy()
        );
        let mtime = std::fs::metadata(path)?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        write_entry(&mut encoder, &name, REG_FILE_MODE, mtime, &data)?;
    }
    write_entry(&mut encoder, TRAILER_NAME, 0, 0, &[])?;

    encoder.finish()
}

struct EntryHeader {
    mode: u32,
    filesize: usize,
    namesize: usize,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn parse_header<R: Read>(reader: &mut R) -> io::Result<Option<EntryHeader>> {
    let mut magic = [0u8; 6];
    if !read_exact_or_eof(reader, &mut magic)? {
        return Ok(None);
    }
    if &magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad cpio magic",
        ));
    }

    let mut fields = [0u64; 13];
    for field in fields.iter_mut() {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let s = std::str::from_utf8(&buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-ascii cpio field"))?;
        *field = u64::from_str_radix(s, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad cpio hex field"))?;
    }

    Ok(Some(EntryHeader {
        mode: fields[1] as u32,
        filesize: fields[6] as usize,
        namesize: fields[11] as usize,
    }))
}

/// Extract a gzip-compressed CPIO "newc" stream into `dest_dir`, returning
/// the number of decompressed payload bytes written (for throughput
/// logging). Reads incrementally; the whole stream is never buffered.
pub fn extract_stream<R: Read>(gz_reader: R, dest_dir: &Path) -> io::Result<u64> {
    let mut reader = GzDecoder::new(gz_reader);
    let mut total = 0u64;

    loop {
        let Some(header) = parse_header(&mut reader)? else {
            break;
        };

        let mut name_buf = vec![0u8; header.namesize];
        reader.read_exact(&mut name_buf)?;
        let name = std::ffi::CStr::from_bytes_with_nul(&name_buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "cpio name not NUL-terminated"))?
            .to_string_lossy()
            .into_owned();

        let mut pad = vec![0u8; pad_len(110 + header.namesize)];
        reader.read_exact(&mut pad)?;

        if name == TRAILER_NAME {
            break;
        }

        let mut data = vec![0u8; header.filesize];
        reader.read_exact(&mut data)?;
        let mut pad = vec![0u8; pad_len(header.filesize)];
        reader.read_exact(&mut pad)?;

        let rel_path = name.trim_start_matches("./");
        let out_path = dest_dir.join(rel_path);
        if header.mode & 0o170000 == DIR_MODE {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out_path, &data)?;
        }

        total += data.len() as u64;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_single_file() {
        let dir = std::env::temp_dir().join(format!("opendrop-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let src = dir.join("hello.txt");
        std::fs::write(&src, b"hello airdrop").unwrap();

        let archive = build_archive(&[src.clone()]).unwrap();

        let dest = dir.join("out");
        std::fs::create_dir_all(&dest).unwrap();
        let written = extract_stream(Cursor::new(archive), &dest).unwrap();

        let roundtripped = std::fs::read(dest.join("hello.txt")).unwrap();
        assert_eq!(roundtripped, b"hello airdrop");
        assert_eq!(written, b"hello airdrop".len() as u64);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn header_padding_is_four_byte_aligned() {
        assert_eq!(pad_len(110 + 5), 1);
        assert_eq!(pad_len(110 + 11), 3);
        assert_eq!(pad_len(0), 0);
    }
}
