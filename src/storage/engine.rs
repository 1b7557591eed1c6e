use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

use tracing::warn;

use crate::core::error::Result;

/// Append-only frame log, one binary file per collection.
///
/// Frame format: a 4-byte little-endian payload length followed by that many
/// bytes of UTF-8 JSON. No checksum, no terminator. Frames are independent,
/// so a torn tail left by a crash is ignored on load and everything before
/// it is preserved.
pub struct LogEngine {
    base_dir: PathBuf,
}

impl LogEngine {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        LogEngine {
            base_dir: base_dir.into(),
        }
    }

    /// Ensures the data directory exists, creating it recursively if not.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_dir.join(format!("{}.aev", collection))
    }

    /// Enumerates collections by scanning for `.aev` files.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.base_dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "aev") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Appends one frame to the collection log.
    pub fn append(&self, collection: &str, payload: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))?;
        write_frame(&mut file, payload)?;
        Ok(())
    }

    /// Replays every complete frame in append order.
    ///
    /// A short read on either the header or the payload ends the scan: prior
    /// frames are the recovered state. Non-UTF-8 payloads are skipped without
    /// aborting the scan since the framing itself is still intact.
    pub fn load_log(&self, collection: &str) -> Result<Vec<String>> {
        let file = match File::open(self.collection_path(collection)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut frames = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).is_err() {
                break; // EOF or torn header
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                break; // torn payload
            }

            match String::from_utf8(payload) {
                Ok(frame) => frames.push(frame),
                Err(_) => warn!(collection, "Storage: skipping non-UTF-8 frame"),
            }
        }
        Ok(frames)
    }

    /// Rewrites the log to contain exactly the given frames.
    ///
    /// The snapshot is written to `<collection>.aev.tmp`, flushed, and renamed
    /// over the live file. On any write failure the temp file is removed and
    /// the live file is left untouched.
    pub fn compact(&self, collection: &str, frames: &[String]) -> Result<()> {
        let path = self.collection_path(collection);
        let tmp_path = self.base_dir.join(format!("{}.aev.tmp", collection));

        let written = (|| -> Result<()> {
            let mut file = File::create(&tmp_path)?;
            for frame in frames {
                write_frame(&mut file, frame)?;
            }
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

fn write_frame(file: &mut File, payload: &str) -> Result<()> {
    let len = payload.len() as u32;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(payload.as_bytes())?;
    Ok(())
}
