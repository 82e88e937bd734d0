use std::thread;
use std::time::Duration;

use ffmpeg_next::format::context::Input;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video;

use crate::shared::frame::Frame;
use crate::video::domain::capture_device::{CaptureDevice, FrameSource};

/// Camera, capture card, file or stream URL opened through libavdevice /
/// libavformat.
///
/// `format` names an input device format such as `v4l2`, `avfoundation` or
/// `dshow`; without it ffmpeg probes `url` as a regular input. `options` are
/// passed to the demuxer verbatim (`video_size`, `framerate`, ...).
#[derive(Clone, Debug)]
pub struct FfmpegCaptureDevice {
    url: String,
    format: Option<String>,
    options: Vec<(String, String)>,
}

impl FfmpegCaptureDevice {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: None,
            options: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    fn dictionary(&self) -> ffmpeg_next::Dictionary<'static> {
        let mut dict = ffmpeg_next::Dictionary::new();
        for (key, value) in &self.options {
            dict.set(key, value);
        }
        dict
    }

    fn open_input(&self) -> Result<Input, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let Some(name) = self.format.as_deref() else {
            return Ok(ffmpeg_next::format::input_with_dictionary(
                &self.url,
                self.dictionary(),
            )?);
        };

        let format = ffmpeg_next::device::input::video()
            .find(|f| f.name() == name)
            .ok_or_else(|| format!("input device format '{name}' is not available"))?;
        match ffmpeg_next::format::open_with(&self.url, &format, self.dictionary())? {
            ffmpeg_next::format::context::Context::Input(input) => Ok(input),
            ffmpeg_next::format::context::Context::Output(_) => {
                Err(format!("'{name}' opened as an output format").into())
            }
        }
    }
}

impl CaptureDevice for FfmpegCaptureDevice {
    fn open(&self) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
        let input = self.open_input()?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        log::info!(
            "Opened {} ({}x{}, {})",
            self.describe(),
            decoder.width(),
            decoder.height(),
            decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default()
        );

        Ok(Box::new(FfmpegFrameSource {
            open: Some(OpenInput {
                input,
                decoder,
                scaler: None,
                stream_index,
            }),
            frame_index: 0,
        }))
    }

    fn describe(&self) -> String {
        match &self.format {
            Some(format) => format!("{format}:{}", self.url),
            None => self.url.clone(),
        }
    }
}

struct OpenInput {
    input: Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<Scaler>,
    stream_index: usize,
}

struct Scaler {
    context: scaling::Context,
    width: u32,
    height: u32,
    format: ffmpeg_next::format::Pixel,
}

/// Decodes the opened input to RGB24 one frame at a time.
pub struct FfmpegFrameSource {
    open: Option<OpenInput>,
    frame_index: usize,
}

// Safety: FfmpegFrameSource is owned by exactly one capture thread.
// The raw pointers inside ffmpeg types are never shared across threads.
unsafe impl Send for FfmpegFrameSource {}

impl FrameSource for FfmpegFrameSource {
    fn read_frame(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        let open = self.open.as_mut().ok_or("capture device already released")?;
        let mut decoded = Video::empty();
        loop {
            if open.decoder.receive_frame(&mut decoded).is_ok() {
                break;
            }
            let packet = open.next_packet()?;
            if packet.stream() != open.stream_index {
                continue;
            }
            if open.decoder.send_packet(&packet).is_err() {
                continue;
            }
        }

        let pixels = open.to_rgb(&decoded)?;
        let frame = Frame::new(
            pixels,
            decoded.width(),
            decoded.height(),
            3,
            self.frame_index,
        );
        self.frame_index += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if self.open.take().is_some() {
            log::debug!("Capture device released after {} frames", self.frame_index);
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Consecutive EAGAIN reads tolerated before the device is considered gone.
const MAX_READ_RETRIES: u32 = 2000;
const READ_RETRY_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Retry,
    Fail,
}

/// Only EAGAIN (non-blocking device with no packet ready) is transient;
/// end of stream and every other error ends the capture.
fn classify_read_error(err: &ffmpeg_next::Error) -> ReadOutcome {
    match err {
        ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN => {
            ReadOutcome::Retry
        }
        _ => ReadOutcome::Fail,
    }
}

impl OpenInput {
    fn next_packet(&mut self) -> Result<ffmpeg_next::Packet, Box<dyn std::error::Error>> {
        let mut retries = 0;
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            let err = match packet.read(&mut self.input) {
                Ok(()) => return Ok(packet),
                Err(ffmpeg_next::Error::Eof) => {
                    return Err("capture device reached end of stream".into())
                }
                Err(err) => err,
            };
            if classify_read_error(&err) == ReadOutcome::Fail || retries >= MAX_READ_RETRIES {
                return Err(format!("capture device read failed: {err}").into());
            }
            retries += 1;
            thread::sleep(READ_RETRY_DELAY);
        }
    }

    fn to_rgb(&mut self, decoded: &Video) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        let (width, height, format) = (decoded.width(), decoded.height(), decoded.format());
        let stale = self
            .scaler
            .as_ref()
            .map_or(true, |s| s.width != width || s.height != height || s.format != format);
        if stale {
            let context = scaling::Context::get(
                format,
                width,
                height,
                ffmpeg_next::format::Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some(Scaler {
                context,
                width,
                height,
                format,
            });
        }
        let scaler = self.scaler.as_mut().ok_or("scaler unavailable")?;

        let mut rgb = Video::empty();
        scaler.context.run(decoded, &mut rgb)?;
        Ok(packed_rgb(&rgb, width, height))
    }
}

/// Strips per-row stride padding from an RGB24 frame.
fn packed_rgb(rgb: &Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_len]);
    }
    pixels
}
