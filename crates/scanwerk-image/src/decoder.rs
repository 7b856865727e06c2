// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Streaming RGBA decoder.
//
// Raw scan data arrives in chunks with no alignment to scan lines.  The
// decoder keeps the bytes of an incomplete line as a remainder, converts every
// whole line it can to RGBA, and copies the result into a buffer sized for the
// whole page.  Supported input: single-pass gray or RGB at 1 or 8 bits with a
// known line count.

use std::path::Path;

use image::{ImageFormat, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, trace};

use scanwerk_core::{Frame, Result, ScanParameters, ScanwerkError};

/// Row-major RGBA pixels, top row first, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// A fully transparent black buffer.
    ///
    /// Fails with `Image` if the page does not fit in memory.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let too_large =
            || ScanwerkError::Image(format!("a {width}x{height} page does not fit in memory"));
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(too_large)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| too_large())?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// RGBA value of pixel (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut px = [0; 4];
        px.copy_from_slice(&self.data[offset..offset + 4]);
        Some(px)
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            ScanwerkError::Image(format!(
                "buffer of {} bytes does not hold {}x{} pixels",
                self.data.len(),
                self.width,
                self.height
            ))
        })
    }

    /// Encode as PNG.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        self.to_rgba_image()?
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|err| ScanwerkError::Image(format!("PNG encoding failed: {err}")))?;
        Ok(buffer)
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.to_rgba_image()?
            .save_with_format(path, ImageFormat::Png)
            .map_err(|err| {
                ScanwerkError::Image(format!("failed to save {}: {err}", path.display()))
            })?;
        debug!(width = self.width, height = self.height, "scan saved");
        Ok(())
    }

    /// Lowercase hex SHA-256 of the raw RGBA bytes.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        hex::encode(hasher.finalize())
    }
}

/// Whole lines decoded from one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBlock {
    /// Index of the first line in the page.
    pub first_line: usize,
    pub lines: usize,
    pub pixels_per_line: usize,
    /// `lines * pixels_per_line * 4` RGBA bytes.
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Gray8,
    Rgb8,
    Gray1,
    Rgb1,
}

/// Check that a scan can be decoded, before any data arrives.
pub fn validate_parameters(parameters: &ScanParameters) -> Result<()> {
    layout(parameters).map(|_| ())
}

fn layout(parameters: &ScanParameters) -> Result<Layout> {
    let reject = |reason: &str| ScanwerkError::UnsupportedParameters {
        reason: reason.to_string(),
        parameters: *parameters,
    };

    let layout = match (parameters.format, parameters.depth) {
        (Frame::Gray, 8) => Layout::Gray8,
        (Frame::Rgb, 8) => Layout::Rgb8,
        (Frame::Gray, 1) => Layout::Gray1,
        (Frame::Rgb, 1) => Layout::Rgb1,
        (Frame::Gray | Frame::Rgb, _) => return Err(reject("bit depth must be 1 or 8")),
        _ => return Err(reject("only gray and RGB frames are supported")),
    };
    if !parameters.last_frame {
        return Err(reject("multi-pass scans are not supported"));
    }
    if parameters.lines < 0 {
        return Err(reject("scans of unknown height are not supported"));
    }
    if parameters.bytes_per_line <= 0 || parameters.pixels_per_line <= 0 || parameters.lines <= 0
    {
        return Err(reject("empty image"));
    }
    let bits = i64::from(parameters.pixels_per_line)
        * i64::from(parameters.depth)
        * i64::from(parameters.format.channels());
    if i64::from(parameters.bytes_per_line) * 8 < bits {
        return Err(reject("bytes per line too small for the pixel count"));
    }
    Ok(layout)
}

/// Incremental raw-to-RGBA converter for one scan.
#[derive(Debug)]
pub struct ImageDecoder {
    parameters: ScanParameters,
    layout: Layout,
    bytes_per_line: usize,
    pixels_per_line: usize,
    lines: usize,
    remainder: Vec<u8>,
    buffer: PixelBuffer,
    next_line: usize,
}

impl ImageDecoder {
    /// Validate `parameters` and allocate the page buffer.
    pub fn new(parameters: ScanParameters) -> Result<Self> {
        let layout = layout(&parameters)?;
        // Validation guarantees all three are positive.
        let bytes_per_line = parameters.bytes_per_line as usize;
        let pixels_per_line = parameters.pixels_per_line as usize;
        let lines = parameters.lines as usize;
        let buffer = PixelBuffer::new(pixels_per_line as u32, lines as u32).map_err(|err| {
            ScanwerkError::UnsupportedParameters {
                reason: err.to_string(),
                parameters,
            }
        })?;
        debug!(?layout, %parameters, "decoder ready");
        Ok(Self {
            parameters,
            layout,
            bytes_per_line,
            pixels_per_line,
            lines,
            remainder: Vec::new(),
            buffer,
            next_line: 0,
        })
    }

    pub fn parameters(&self) -> &ScanParameters {
        &self.parameters
    }

    /// Bytes held back because they do not fill a line yet.
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }

    pub fn lines_decoded(&self) -> usize {
        self.next_line
    }

    /// Whether every declared line has been decoded.
    pub fn is_complete(&self) -> bool {
        self.next_line == self.lines
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer {
        self.buffer
    }

    /// Feed one chunk. Returns the lines it completed, if any.
    ///
    /// Fails with `Decode` if the data runs past the declared line count.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<LineBlock>> {
        self.remainder.extend_from_slice(chunk);
        let available = self.remainder.len() / self.bytes_per_line;
        if available == 0 {
            trace!(held = self.remainder.len(), "partial line held back");
            return Ok(None);
        }
        if self.next_line + available > self.lines {
            return Err(ScanwerkError::Decode(format!(
                "received line {} of a scan declaring {} lines",
                self.next_line + available,
                self.lines
            )));
        }

        let consumed = available * self.bytes_per_line;
        let row_bytes = self.pixels_per_line * 4;
        let mut rgba = vec![0; available * row_bytes];
        for (row, out) in self.remainder[..consumed]
            .chunks_exact(self.bytes_per_line)
            .zip(rgba.chunks_exact_mut(row_bytes))
        {
            decode_line(self.layout, row, out);
        }
        self.remainder.drain(..consumed);

        let offset = self.next_line * row_bytes;
        self.buffer.data[offset..offset + rgba.len()].copy_from_slice(&rgba);
        let block = LineBlock {
            first_line: self.next_line,
            lines: available,
            pixels_per_line: self.pixels_per_line,
            rgba,
        };
        self.next_line += available;
        trace!(
            first_line = block.first_line,
            lines = available,
            held = self.remainder.len(),
            "lines decoded"
        );
        Ok(Some(block))
    }
}

/// Convert one raw line into `out.len() / 4` RGBA pixels.
fn decode_line(layout: Layout, row: &[u8], out: &mut [u8]) {
    let pixels = out.chunks_exact_mut(4);
    match layout {
        Layout::Gray8 => {
            for (px, &v) in pixels.zip(row) {
                px.copy_from_slice(&[v, v, v, 0xff]);
            }
        }
        Layout::Rgb8 => {
            for (px, rgb) in pixels.zip(row.chunks_exact(3)) {
                px.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 0xff]);
            }
        }
        Layout::Gray1 => {
            // Set bits are black.
            for (p, px) in pixels.enumerate() {
                let v = if row[p / 8] & (0x80 >> (p % 8)) != 0 { 0x00 } else { 0xff };
                px.copy_from_slice(&[v, v, v, 0xff]);
            }
        }
        Layout::Rgb1 => {
            // Three bytes carry R, G and B for eight pixels; set bits are full
            // intensity, the opposite of 1-bit gray.
            let bit = |byte: Option<&u8>, mask: u8| match byte {
                Some(b) if b & mask != 0 => 0xff,
                _ => 0x00,
            };
            for (p, px) in pixels.enumerate() {
                let base = (p / 8) * 3;
                let mask = 0x80 >> (p % 8);
                px.copy_from_slice(&[
                    bit(row.get(base), mask),
                    bit(row.get(base + 1), mask),
                    bit(row.get(base + 2), mask),
                    0xff,
                ]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(format: Frame, depth: i32, bytes_per_line: i32, pixels: i32, lines: i32) -> ScanParameters {
        ScanParameters {
            format,
            last_frame: true,
            bytes_per_line,
            pixels_per_line: pixels,
            lines,
            depth,
        }
    }

    fn decode_all(parameters: ScanParameters, chunks: &[&[u8]]) -> (PixelBuffer, usize) {
        let mut decoder = ImageDecoder::new(parameters).expect("supported");
        let mut events = 0;
        for chunk in chunks {
            if decoder.push(chunk).expect("decode").is_some() {
                events += 1;
            }
        }
        assert!(decoder.remainder().is_empty());
        (decoder.into_buffer(), events)
    }

    #[test]
    fn gray_chunks_across_line_boundaries() {
        let mut decoder = ImageDecoder::new(params(Frame::Gray, 8, 4, 4, 3)).expect("supported");

        assert_eq!(decoder.push(&[10, 20]).expect("decode"), None);
        assert_eq!(decoder.remainder(), &[10, 20]);
        let block = decoder
            .push(&[30, 40, 50, 60, 70, 80])
            .expect("decode")
            .expect("two full lines");

        assert_eq!(block.first_line, 0);
        assert_eq!(block.lines, 2);
        assert_eq!(
            &block.rgba[..16],
            &[10, 10, 10, 255, 20, 20, 20, 255, 30, 30, 30, 255, 40, 40, 40, 255]
        );
        assert_eq!(&block.rgba[16..20], &[50, 50, 50, 255]);
        assert!(decoder.remainder().is_empty());
        assert_eq!(decoder.lines_decoded(), 2);
    }

    #[test]
    fn partial_line_is_held_until_completed() {
        let mut decoder = ImageDecoder::new(params(Frame::Gray, 8, 4, 4, 3)).expect("supported");
        decoder.push(&[10, 20]).expect("decode");
        let block = decoder
            .push(&[30, 40, 50, 60, 70])
            .expect("decode")
            .expect("one line");
        assert_eq!(block.lines, 1);
        assert_eq!(decoder.remainder(), &[50, 60, 70]);

        let block = decoder
            .push(&[80, 90, 100, 110, 120])
            .expect("decode")
            .expect("two lines");
        assert_eq!(block.first_line, 1);
        assert_eq!(block.lines, 2);
        assert!(decoder.remainder().is_empty());
        assert_eq!(decoder.buffer().pixel(0, 1), Some([50, 50, 50, 255]));
        assert_eq!(decoder.buffer().pixel(3, 2), Some([120, 120, 120, 255]));
        assert!(decoder.is_complete());
    }

    #[test]
    fn one_bit_gray_sets_black() {
        let (buffer, _) = decode_all(params(Frame::Gray, 1, 1, 3, 1), &[&[0b1010_0000]]);
        assert_eq!(
            buffer.as_bytes(),
            &[0, 0, 0, 255, 255, 255, 255, 255, 0, 0, 0, 255]
        );
    }

    #[test]
    fn one_bit_rgb_sets_full_intensity() {
        // Pixel 0: R only, pixel 1: G and B, pixel 2: nothing.
        let (buffer, _) = decode_all(
            params(Frame::Rgb, 1, 3, 3, 1),
            &[&[0b1000_0000, 0b0100_0000, 0b0100_0000]],
        );
        assert_eq!(buffer.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(buffer.pixel(1, 0), Some([0, 255, 255, 255]));
        assert_eq!(buffer.pixel(2, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn rgb_copies_channels_and_skips_line_padding() {
        // Two pixels per line plus one padding byte.
        let (buffer, events) = decode_all(
            params(Frame::Rgb, 8, 7, 2, 2),
            &[&[1, 2, 3, 4, 5, 6, 99, 7, 8, 9, 10, 11, 12, 99]],
        );
        assert_eq!(events, 1);
        assert_eq!(
            buffer.as_bytes(),
            &[1, 2, 3, 255, 4, 5, 6, 255, 7, 8, 9, 255, 10, 11, 12, 255]
        );
    }

    #[test]
    fn output_does_not_depend_on_chunk_boundaries() {
        let parameters = params(Frame::Rgb, 8, 9, 3, 5);
        let raw: Vec<u8> = (0..45u8).map(|b| b.wrapping_mul(37)).collect();

        let (whole, _) = decode_all(parameters, &[&raw]);
        for split in [1, 2, 4, 8, 9, 10, 17, 44] {
            let chunks: Vec<&[u8]> = raw.chunks(split).collect();
            let (pieced, _) = decode_all(parameters, &chunks);
            assert_eq!(pieced, whole, "chunks of {split}");
        }
        let (uneven, _) = decode_all(parameters, &[&raw[..3], &raw[3..30], &[], &raw[30..]]);
        assert_eq!(uneven, whole);
    }

    #[test]
    fn exact_multiples_leave_no_remainder() {
        for (format, depth, bytes_per_line, pixels) in [
            (Frame::Gray, 8, 5, 5),
            (Frame::Rgb, 8, 6, 2),
            (Frame::Gray, 1, 2, 16),
            (Frame::Rgb, 1, 3, 8),
        ] {
            let parameters = params(format, depth, bytes_per_line, pixels, 4);
            let mut decoder = ImageDecoder::new(parameters).expect("supported");
            let raw = vec![0x5a; bytes_per_line as usize * 4];
            let block = decoder.push(&raw).expect("decode").expect("lines");
            assert_eq!(block.lines, 4);
            assert!(decoder.remainder().is_empty());
        }
    }

    #[test]
    fn unsupported_parameters_are_rejected_up_front() {
        let cases = [
            (params(Frame::Red, 8, 4, 4, 4), "frames"),
            (params(Frame::Gray, 16, 8, 4, 4), "bit depth"),
            (params(Frame::Gray, 8, 4, 4, -1), "unknown height"),
            (params(Frame::Gray, 8, 4, 4, 0), "empty"),
            (params(Frame::Rgb, 8, 8, 4, 4), "bytes per line"),
        ];
        for (parameters, reason) in cases {
            match ImageDecoder::new(parameters) {
                Err(ScanwerkError::UnsupportedParameters { reason: got, .. }) => {
                    assert!(got.contains(reason), "{got} should mention {reason}");
                }
                other => panic!("expected rejection for {parameters}, got {other:?}"),
            }
        }

        let mut three_pass = params(Frame::Gray, 8, 4, 4, 4);
        three_pass.last_frame = false;
        assert!(validate_parameters(&three_pass).is_err());
    }

    #[test]
    fn data_past_the_last_line_is_an_error() {
        let mut decoder = ImageDecoder::new(params(Frame::Gray, 8, 2, 2, 1)).expect("supported");
        let err = decoder.push(&[1, 2, 3, 4]).expect_err("too much data");
        assert!(matches!(err, ScanwerkError::Decode(_)));
    }

    #[test]
    fn png_export_round_trips_pixels() {
        let (buffer, _) = decode_all(params(Frame::Gray, 8, 2, 2, 2), &[&[0, 64, 128, 255]]);
        let png = buffer.to_png_bytes().expect("encode");
        let decoded = image::load_from_memory(&png).expect("decode").to_rgba8();
        assert_eq!(decoded.as_raw(), buffer.as_bytes());
    }

    #[test]
    fn save_png_writes_a_readable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scan.png");
        let buffer = PixelBuffer::new(3, 2).expect("buffer");
        buffer.save_png(&path).expect("save");
        let loaded = image::open(&path).expect("open");
        assert_eq!((loaded.width(), loaded.height()), (3, 2));
    }

    #[test]
    fn digest_tracks_pixel_content() {
        let blank = PixelBuffer::new(2, 2).expect("buffer");
        let (gray, _) = decode_all(params(Frame::Gray, 8, 2, 2, 2), &[&[1, 2, 3, 4]]);
        assert_eq!(blank.sha256_hex().len(), 64);
        assert_eq!(
            blank.sha256_hex(),
            PixelBuffer::new(2, 2).expect("buffer").sha256_hex()
        );
        assert_ne!(blank.sha256_hex(), gray.sha256_hex());
    }

    #[test]
    fn page_too_large_for_memory_is_rejected() {
        let huge = params(Frame::Gray, 8, i32::MAX, i32::MAX, i32::MAX);
        let err = ImageDecoder::new(huge).expect_err("cannot allocate");
        assert!(
            matches!(&err, ScanwerkError::UnsupportedParameters { reason, .. } if reason.contains("does not fit")),
            "{err:?}"
        );
        assert!(matches!(
            PixelBuffer::new(u32::MAX, u32::MAX),
            Err(ScanwerkError::Image(_))
        ));
    }
}
