//! Media identity: SHA-256 over a canonical decoded PCM stream.
//!
//! Container, file name and tags don't take part in the hash; only the
//! decoded samples and their format do. The identity is
//! `sha256("<format>:<sha256 of pcm bytes>")`.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use sha2::{Digest, Sha256};

use super::types::{CacheError, CacheResult, MediaIdentity};
use crate::fs_utils::sha256_hex;

/// Canonical format produced by [`FfmpegDecoder`].
const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Decodes a media file's audio into a byte sink.
pub trait PcmDecoder: Send + Sync {
    /// Stream decoded PCM into `sink` and return a format descriptor
    /// (encoding, rate, channels).
    fn decode(&self, media: &Path, sink: &mut dyn Write) -> CacheResult<String>;

    fn name(&self) -> &str;
}

/// Compute the identity of `media` with `decoder`.
pub fn compute_identity(decoder: &dyn PcmDecoder, media: &Path) -> CacheResult<MediaIdentity> {
    if !media.is_file() {
        return Err(CacheError::decoder(media, "file not found"));
    }

    let mut sink = HashingSink::default();
    let format = decoder.decode(media, &mut sink)?;
    if sink.bytes == 0 {
        return Err(CacheError::NoAudio(media.to_path_buf()));
    }

    let pcm_hash = format!("{:x}", sink.hasher.finalize());
    let identity = MediaIdentity::parse(&sha256_hex(format!("{}:{}", format, pcm_hash).as_bytes()))?;

    tracing::debug!(
        "Identity of {} via {} ({} PCM bytes, {}): {}",
        media.display(),
        decoder.name(),
        sink.bytes,
        format,
        identity.short()
    );
    Ok(identity)
}

#[derive(Default)]
struct HashingSink {
    hasher: Sha256,
    bytes: u64,
}

impl Write for HashingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decodes the first audio stream of any container with FFmpeg.
///
/// Output is mono 16 kHz signed 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: String,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegDecoder {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PcmDecoder for FfmpegDecoder {
    fn decode(&self, media: &Path, sink: &mut dyn Write) -> CacheResult<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-nostdin")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(media)
            .arg("-vn")
            .arg("-map")
            .arg("0:a:0")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(CANONICAL_SAMPLE_RATE.to_string())
            .arg("-f")
            .arg("s16le")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("pipe:1");
        cmd.stdin(Stdio::null())
            .stderr(Stdio::null())
            .stdout(Stdio::piped());

        tracing::debug!("Running FFmpeg: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| CacheError::decoder(media, format!("failed to spawn {}: {}", self.program, e)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CacheError::decoder(media, "failed to capture FFmpeg stdout"))?;

        let copied = io::copy(&mut stdout, sink);
        let status = child
            .wait()
            .map_err(|e| CacheError::decoder(media, format!("FFmpeg process error: {}", e)))?;
        copied.map_err(|e| CacheError::io("read FFmpeg output", e))?;

        if !status.success() {
            // FFmpeg fails on `-map 0:a:0` when there is no audio stream.
            return Err(CacheError::decoder(
                media,
                format!("FFmpeg exited with code: {:?}", status.code()),
            ));
        }

        Ok(format!("pcm_s16le/{}/1", CANONICAL_SAMPLE_RATE))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Reads PCM straight from RIFF/WAVE files.
///
/// Only the `fmt ` and `data` chunks are used, so `LIST`/`INFO` tags and
/// other metadata chunks don't change the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

#[derive(Debug, Clone, Copy)]
struct WavFormat {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

impl WavFormat {
    fn descriptor(&self) -> String {
        let encoding = match (self.format_tag, self.bits_per_sample) {
            (3, bits) => format!("pcm_f{}le", bits),
            (_, 8) => "pcm_u8".to_string(),
            (_, bits) => format!("pcm_s{}le", bits),
        };
        format!("{}/{}/{}", encoding, self.sample_rate, self.channels)
    }
}

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Largest `fmt ` chunk accepted (WAVE_FORMAT_EXTENSIBLE is 40 bytes).
const MAX_FMT_CHUNK: u32 = 64;

impl PcmDecoder for WavDecoder {
    fn decode(&self, media: &Path, sink: &mut dyn Write) -> CacheResult<String> {
        let file = File::open(media).map_err(|e| CacheError::io("open media", e))?;
        let mut reader = BufReader::new(file);
        let malformed = |msg: &str| CacheError::decoder(media, msg.to_string());

        let mut header = [0u8; 12];
        reader
            .read_exact(&mut header)
            .map_err(|_| malformed("not a RIFF/WAVE file"))?;
        if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
            return Err(malformed("not a RIFF/WAVE file"));
        }

        let mut format: Option<WavFormat> = None;
        loop {
            let mut chunk = [0u8; 8];
            match reader.read_exact(&mut chunk) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(CacheError::io("read WAV chunk", e)),
            }
            let id = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

            match &id {
                b"fmt " => {
                    if size < 16 {
                        return Err(malformed("fmt chunk too short"));
                    }
                    if size > MAX_FMT_CHUNK {
                        return Err(malformed("fmt chunk too large"));
                    }
                    let mut body = vec![0u8; size as usize];
                    reader
                        .read_exact(&mut body)
                        .map_err(|_| malformed("truncated fmt chunk"))?;
                    let parsed = WavFormat {
                        format_tag: u16::from_le_bytes([body[0], body[1]]),
                        channels: u16::from_le_bytes([body[2], body[3]]),
                        sample_rate: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                        bits_per_sample: u16::from_le_bytes([body[14], body[15]]),
                    };
                    match parsed.format_tag {
                        WAVE_FORMAT_PCM | WAVE_FORMAT_IEEE_FLOAT | WAVE_FORMAT_EXTENSIBLE => {}
                        other => {
                            return Err(malformed(&format!("unsupported WAV format tag {}", other)))
                        }
                    }
                    format = Some(parsed);
                    skip_pad(&mut reader, size)?;
                }
                b"data" => {
                    let format = format.ok_or_else(|| malformed("data chunk before fmt chunk"))?;
                    if size == u32::MAX {
                        // Streaming writers leave the size unset.
                        io::copy(&mut reader, sink).map_err(|e| CacheError::io("read WAV data", e))?;
                    } else {
                        let copied = io::copy(&mut (&mut reader).take(size as u64), sink)
                            .map_err(|e| CacheError::io("read WAV data", e))?;
                        if copied < size as u64 {
                            return Err(malformed("truncated data chunk"));
                        }
                    }
                    return Ok(format.descriptor());
                }
                _ => {
                    let skip = size as u64 + (size % 2) as u64;
                    let skipped = io::copy(&mut (&mut reader).take(skip), &mut io::sink())
                        .map_err(|e| CacheError::io("skip WAV chunk", e))?;
                    if skipped < skip {
                        break;
                    }
                }
            }
        }

        Err(CacheError::NoAudio(media.to_path_buf()))
    }

    fn name(&self) -> &str {
        "wav"
    }
}

/// Chunks are word-aligned: odd sizes carry one pad byte.
fn skip_pad<R: Read>(reader: &mut R, size: u32) -> CacheResult<()> {
    if size % 2 == 1 {
        let mut pad = [0u8; 1];
        // A missing pad byte at end of file is harmless.
        let _ = reader.read(&mut pad).map_err(|e| CacheError::io("read WAV padding", e))?;
    }
    Ok(())
}

/// Write a 16-bit PCM WAV file. Used to build test media.
#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, samples: &[i16], sample_rate: u32, tag: Option<&[u8]>) {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        data.extend_from_slice(&s.to_le_bytes());
    }

    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");
    if let Some(tag) = tag {
        body.extend_from_slice(b"LIST");
        body.extend_from_slice(&(tag.len() as u32).to_le_bytes());
        body.extend_from_slice(tag);
        if tag.len() % 2 == 1 {
            body.push(0);
        }
    }
    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&sample_rate.to_le_bytes());
    body.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    body.extend_from_slice(&2u16.to_le_bytes());
    body.extend_from_slice(&16u16.to_le_bytes());
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(&data);

    let mut file = Vec::new();
    file.extend_from_slice(b"RIFF");
    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend_from_slice(&body);
    std::fs::write(path, file).unwrap();
}
