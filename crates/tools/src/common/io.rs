//! ファイルI/Oユーティリティ（gzip対応）
//!
//! パス `-` は標準入出力、拡張子 `.gz` は gzip 圧縮として扱う。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_stdio(p: &Path) -> bool {
    p.to_string_lossy() == "-"
}

fn is_gzip(p: &Path) -> bool {
    p.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if is_stdio(p) {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Stdout(io::Stdout),
    Gz(flate2::write::GzEncoder<BufWriter<File>>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Stdout(s) => s.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Stdout(s) => s.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    /// Finalize the stream and flush underlying file/stdout.
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::Plain(mut f) => f.flush(),
            Writer::Stdout(mut s) => s.flush(),
            Writer::Gz(e) => e.finish()?.flush(),
        }
    }
}

pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let p = path.as_ref();
    if is_stdio(p) {
        return Ok(Writer::Stdout(io::stdout()));
    }
    let f = BufWriter::new(File::create(p)?);
    if is_gzip(p) {
        let enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        return Ok(Writer::Gz(enc));
    }
    Ok(Writer::Plain(f))
}

/// JSON lines を読み込む。空行は読み飛ばす。
///
/// `limit` を指定した場合はその件数で打ち切る。
pub fn read_json_lines<T, P>(path: P, limit: Option<usize>) -> io::Result<Vec<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let reader = open_reader(path)?;
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        if limit.is_some_and(|n| records.len() >= n) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("line {}: {e}", lineno + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// 1レコード1行の JSON lines として書き出す。
pub fn write_json_lines<T, P>(path: P, records: &[T]) -> io::Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let mut w = open_writer(path)?;
    for record in records {
        serde_json::to_writer(&mut w, record).map_err(io::Error::from)?;
        w.write_all(b"\n")?;
    }
    w.close()
}
