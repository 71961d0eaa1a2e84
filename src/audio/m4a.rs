//! Audio-only MP4 (`.m4a`) writer
//!
//! Samples are written into `mdat` as they arrive; the `moov` box with the
//! sample tables goes after it when the file is finalized, and the `mdat`
//! size is patched in place. The single AAC track carries an edit list that
//! skips the encoder's priming samples.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::errors::MediaError;

/// Movie timescale (milliseconds)
const MOVIE_TIMESCALE: u32 = 1000;

/// `und` packed as ISO-639-2/T
const LANGUAGE_UND: u16 = 0x55C4;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// AAC track parameters
#[derive(Debug, Clone)]
pub struct M4aTrack {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in each access unit
    pub frame_length: u32,
    /// Priming samples to skip on playback
    pub priming: u32,
    /// AudioSpecificConfig from the encoder
    pub audio_specific_config: Vec<u8>,
    pub bitrate: u32,
}

pub struct M4aWriter {
    file: BufWriter<File>,
    track: M4aTrack,
    /// Offset of the `mdat` size field
    mdat_offset: u64,
    data_offset: u64,
    sample_sizes: Vec<u32>,
    data_len: u64,
}

impl M4aWriter {
    pub fn create(path: &Path, track: M4aTrack) -> Result<Self, MediaError> {
        if track.sample_rate == 0 || track.sample_rate > u16::MAX as u32 {
            return Err(MediaError::MuxingError(format!(
                "Unsupported sample rate for m4a: {} Hz",
                track.sample_rate
            )));
        }
        if track.frame_length == 0 || track.audio_specific_config.is_empty() {
            return Err(MediaError::MuxingError("Incomplete AAC track description".to_string()));
        }

        let mut file = BufWriter::new(File::create(path)?);

        let mut ftyp = Vec::new();
        ftyp.extend_from_slice(b"M4A ");
        put_u32(&mut ftyp, 0);
        for brand in [b"M4A ", b"mp42", b"isom"] {
            ftyp.extend_from_slice(brand);
        }
        file.write_all(&mp4_box(b"ftyp", &ftyp))?;

        let mdat_offset = file.stream_position()?;
        file.write_all(&8u32.to_be_bytes())?;
        file.write_all(b"mdat")?;
        let data_offset = mdat_offset + 8;

        Ok(Self {
            file,
            track,
            mdat_offset,
            data_offset,
            sample_sizes: Vec::new(),
            data_len: 0,
        })
    }

    /// Append one access unit
    pub fn write_sample(&mut self, data: &[u8]) -> Result<(), MediaError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.data_len + data.len() as u64 + 8 > u32::MAX as u64 {
            return Err(MediaError::MuxingError("Audio file exceeds 4 GiB".to_string()));
        }
        self.file.write_all(data)?;
        self.sample_sizes.push(data.len() as u32);
        self.data_len += data.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Patch `mdat`, append `moov` and close the file.
    ///
    /// `frames` is the number of real (non-priming, non-padding) sample
    /// frames, which becomes the presented duration.
    pub fn finalize(mut self, frames: u64) -> Result<(), MediaError> {
        let moov = self.build_moov(frames);
        self.file.write_all(&moov)?;

        self.file.seek(SeekFrom::Start(self.mdat_offset))?;
        self.file.write_all(&((self.data_len + 8) as u32).to_be_bytes())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    fn build_moov(&self, frames: u64) -> Vec<u8> {
        let track = &self.track;
        let count = self.sample_sizes.len() as u32;
        let media_duration = count as u64 * track.frame_length as u64;
        let movie_duration = (frames * MOVIE_TIMESCALE as u64 / track.sample_rate as u64) as u32;

        // stbl
        let mut stsd = Vec::new();
        put_u32(&mut stsd, 1);
        stsd.extend_from_slice(&self.mp4a());

        let mut stts = Vec::new();
        if count > 0 {
            put_u32(&mut stts, 1);
            put_u32(&mut stts, count);
            put_u32(&mut stts, track.frame_length);
        } else {
            put_u32(&mut stts, 0);
        }

        let mut stsc = Vec::new();
        let mut stco = Vec::new();
        if count > 0 {
            put_u32(&mut stsc, 1);
            put_u32(&mut stsc, 1);
            put_u32(&mut stsc, count);
            put_u32(&mut stsc, 1);
            put_u32(&mut stco, 1);
            put_u32(&mut stco, self.data_offset as u32);
        } else {
            put_u32(&mut stsc, 0);
            put_u32(&mut stco, 0);
        }

        let mut stsz = Vec::new();
        put_u32(&mut stsz, 0);
        put_u32(&mut stsz, count);
        for size in &self.sample_sizes {
            put_u32(&mut stsz, *size);
        }

        let stbl = mp4_box(
            b"stbl",
            &[
                full_box(b"stsd", 0, 0, &stsd),
                full_box(b"stts", 0, 0, &stts),
                full_box(b"stsc", 0, 0, &stsc),
                full_box(b"stsz", 0, 0, &stsz),
                full_box(b"stco", 0, 0, &stco),
            ]
            .concat(),
        );

        // minf
        let smhd = full_box(b"smhd", 0, 0, &[0; 4]);
        let mut dref = Vec::new();
        put_u32(&mut dref, 1);
        dref.extend_from_slice(&full_box(b"url ", 0, 1, &[]));
        let dinf = mp4_box(b"dinf", &full_box(b"dref", 0, 0, &dref));
        let minf = mp4_box(b"minf", &[smhd, dinf, stbl].concat());

        // mdia
        let mut mdhd = Vec::new();
        put_u32(&mut mdhd, 0);
        put_u32(&mut mdhd, 0);
        put_u32(&mut mdhd, track.sample_rate);
        put_u32(&mut mdhd, media_duration as u32);
        mdhd.extend_from_slice(&LANGUAGE_UND.to_be_bytes());
        mdhd.extend_from_slice(&[0; 2]);

        let mut hdlr = Vec::new();
        put_u32(&mut hdlr, 0);
        hdlr.extend_from_slice(b"soun");
        hdlr.extend_from_slice(&[0; 12]);
        hdlr.extend_from_slice(b"SoundHandler\0");

        let mdia = mp4_box(
            b"mdia",
            &[full_box(b"mdhd", 0, 0, &mdhd), full_box(b"hdlr", 0, 0, &hdlr), minf].concat(),
        );

        // edts: present `frames` samples starting after the priming
        let mut elst = Vec::new();
        put_u32(&mut elst, 1);
        put_u32(&mut elst, movie_duration);
        put_u32(&mut elst, track.priming);
        elst.extend_from_slice(&1u16.to_be_bytes());
        elst.extend_from_slice(&[0; 2]);
        let edts = mp4_box(b"edts", &full_box(b"elst", 0, 0, &elst));

        // tkhd: enabled, in movie
        let mut tkhd = Vec::new();
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, 1);
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, movie_duration);
        tkhd.extend_from_slice(&[0; 8]);
        tkhd.extend_from_slice(&[0; 4]);
        tkhd.extend_from_slice(&0x0100u16.to_be_bytes());
        tkhd.extend_from_slice(&[0; 2]);
        for value in UNITY_MATRIX {
            put_u32(&mut tkhd, value);
        }
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, 0);

        let trak = mp4_box(b"trak", &[full_box(b"tkhd", 0, 3, &tkhd), edts, mdia].concat());

        let mut mvhd = Vec::new();
        put_u32(&mut mvhd, 0);
        put_u32(&mut mvhd, 0);
        put_u32(&mut mvhd, MOVIE_TIMESCALE);
        put_u32(&mut mvhd, movie_duration);
        put_u32(&mut mvhd, 0x0001_0000);
        mvhd.extend_from_slice(&0x0100u16.to_be_bytes());
        mvhd.extend_from_slice(&[0; 10]);
        for value in UNITY_MATRIX {
            put_u32(&mut mvhd, value);
        }
        mvhd.extend_from_slice(&[0; 24]);
        put_u32(&mut mvhd, 2);

        mp4_box(b"moov", &[full_box(b"mvhd", 0, 0, &mvhd), trak].concat())
    }

    /// `mp4a` sample entry with its `esds`
    fn mp4a(&self) -> Vec<u8> {
        let track = &self.track;
        let mut entry = Vec::new();
        entry.extend_from_slice(&[0; 6]);
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0; 8]);
        entry.extend_from_slice(&track.channels.to_be_bytes());
        entry.extend_from_slice(&16u16.to_be_bytes());
        entry.extend_from_slice(&[0; 4]);
        put_u32(&mut entry, track.sample_rate << 16);
        entry.extend_from_slice(&self.esds());
        mp4_box(b"mp4a", &entry)
    }

    fn esds(&self) -> Vec<u8> {
        let track = &self.track;
        let specific = descriptor(0x05, &track.audio_specific_config);

        let mut decoder_config = vec![0x40, 0x15];
        // bufferSizeDB, 24 bits
        decoder_config.extend_from_slice(&[0, 0x18, 0]);
        put_u32(&mut decoder_config, track.bitrate);
        put_u32(&mut decoder_config, track.bitrate);
        decoder_config.extend_from_slice(&specific);

        let mut es = Vec::new();
        es.extend_from_slice(&1u16.to_be_bytes());
        es.push(0);
        es.extend_from_slice(&descriptor(0x04, &decoder_config));
        es.extend_from_slice(&descriptor(0x06, &[0x02]));

        full_box(b"esds", 0, 0, &descriptor(0x03, &es))
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    put_u32(&mut out, (payload.len() + 8) as u32);
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 4);
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    mp4_box(kind, &body)
}

/// MPEG-4 descriptor with a four-byte expandable length
fn descriptor(tag: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = vec![
        tag,
        0x80 | ((len >> 21) & 0x7F) as u8,
        0x80 | ((len >> 14) & 0x7F) as u8,
        0x80 | ((len >> 7) & 0x7F) as u8,
        (len & 0x7F) as u8,
    ];
    out.extend_from_slice(payload);
    out
}
