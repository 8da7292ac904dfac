//! ffmpeg-next decode, compose and encode loops.

use ffmpeg_next as ffmpeg;

use ffmpeg::codec;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{self, Pixel, Sample};
use ffmpeg::media::Type;
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{encoder, Dictionary, Packet, Rational};
use std::path::Path;

use vcompose_models::{EncodingParams, NARRATION_SAMPLE_RATE};

use super::{ClipVisual, NativeJob, StopSignal};
use crate::chapters::metadata_tags;
use crate::compose::{bitrate_bps, conform_samples, fit_within, sample_counts, Canvas, FramePlan, StereoFifo};
use crate::encoders::muxer_args;
use crate::error::{MediaError, MediaResult};
use crate::probe::{AudioStreamInfo, MediaInfo, VideoStreamInfo};
use crate::progress::EncodeProgress;

const SAMPLE_FORMAT: Sample = Sample::F32(SampleType::Planar);
/// Used when the audio encoder accepts any frame size
const DEFAULT_AUDIO_FRAME: usize = 1024;
/// Tolerance when matching decoded timestamps to output frame times
const PTS_EPSILON: f64 = 1e-6;

pub(super) fn compose(job: &NativeJob, stop: &StopSignal, progress: Option<&EncodeProgress>) -> MediaResult<()> {
    ffmpeg::init()?;

    let params = &job.params;
    let (width, height) = (params.resolution.width, params.resolution.height);
    let fps = params.frame_rate.max(1);
    let rate = NARRATION_SAMPLE_RATE;

    let mut octx = format::output(&job.output)?;
    let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);
    let mut video = VideoOut::open(&mut octx, params, global_header)?;
    let mut audio = AudioOut::open(&mut octx, params, global_header)?;

    let mut metadata = Dictionary::new();
    for (key, value) in metadata_tags(&job.metadata) {
        metadata.set(key, &value);
    }
    octx.set_metadata(metadata);
    for (id, chapter) in job.chapters.iter().enumerate() {
        octx.add_chapter(
            id as i64,
            (1, 1000),
            chapter.start_ms() as i64,
            chapter.end_ms() as i64,
            &chapter.title,
        )?;
    }

    let mut muxer = Dictionary::new();
    for pair in muxer_args(&job.output).chunks_exact(2) {
        muxer.set(pair[0].trim_start_matches('-'), &pair[1]);
    }
    octx.write_header_with(muxer)?;
    video.stream_time_base = stream_time_base(&octx, video.index)?;
    audio.stream_time_base = stream_time_base(&octx, audio.index)?;

    let edges: Vec<_> = job.clips.iter().map(|c| c.edges).collect();
    let plan = FramePlan::new(&edges, fps);
    let samples = sample_counts(&edges, rate);
    let total_frames = plan.total_frames().max(1);

    let mut to_encoder = scaling::Context::get(
        Pixel::RGB24,
        width,
        height,
        video.format,
        width,
        height,
        scaling::Flags::BILINEAR,
    )?;
    let mut fifo = StereoFifo::default();
    let mut previous: Option<Canvas> = None;

    for (index, clip) in job.clips.iter().enumerate() {
        let mut source = match &clip.visual {
            ClipVisual::Still(canvas) => VisualSource::Still(Canvas::letterbox(canvas, width, height)),
            ClipVisual::Video(path) => VisualSource::Video(Box::new(VideoReader::open(path, width, height)?)),
        };

        let mut last = None;
        for n in plan.clip_frames(index) {
            stop.check()?;
            let slot = plan.slot(index, n);
            let mut frame = source.frame_at(slot.local)?;
            if let (Some(alpha), Some(prev)) = (slot.dissolve, previous.as_ref()) {
                frame = Canvas::blend(prev, &frame, alpha);
            }
            frame.scale_brightness(slot.brightness);

            let encoded = encoder_frame(&frame, &mut to_encoder, n as i64)?;
            video.send(&mut octx, &encoded)?;
            last = Some(frame);

            if n % fps as u64 == 0 {
                if let Some(progress) = progress {
                    progress.report(n as f64 / total_frames as f64);
                }
            }
        }
        if last.is_some() {
            previous = last;
        }

        let target = samples.get(index).copied().unwrap_or(0);
        let (left, right) = read_audio(&clip.audio, target, rate, stop)?;
        let (left, right) = conform_samples(left, right, target, &clip.edges, rate);
        fifo.push(&left, &right);
        while let Some((l, r)) = fifo.pop(audio.frame_size) {
            audio.send(&mut octx, &l, &r)?;
        }
    }

    let (l, r) = fifo.pop_remaining();
    if !l.is_empty() {
        audio.send(&mut octx, &l, &r)?;
    }
    video.finish(&mut octx)?;
    audio.finish(&mut octx)?;
    octx.write_trailer()?;

    if let Some(progress) = progress {
        progress.report(1.0);
    }
    Ok(())
}

pub(super) fn probe(path: &Path) -> MediaResult<MediaInfo> {
    ffmpeg::init()?;
    let input = format::input(&path)?;

    let duration = (input.duration() > 0).then(|| input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE));

    let video = input.streams().best(Type::Video).and_then(|stream| {
        let parameters = stream.parameters();
        let codec = parameters.id().name().to_string();
        let decoder = codec::context::Context::from_parameters(parameters).ok()?.decoder().video().ok()?;
        let fps = f64::from(stream.avg_frame_rate());
        Some(VideoStreamInfo {
            codec,
            width: decoder.width(),
            height: decoder.height(),
            pix_fmt: decoder.format().descriptor().map(|d| d.name().to_string()),
            fps: if fps.is_finite() { fps } else { 0.0 },
        })
    });

    let audio = input.streams().best(Type::Audio).and_then(|stream| {
        let parameters = stream.parameters();
        let codec = parameters.id().name().to_string();
        let decoder = codec::context::Context::from_parameters(parameters).ok()?.decoder().audio().ok()?;
        let stream_duration = stream.duration() as f64 * f64::from(stream.time_base());
        Some(AudioStreamInfo {
            codec,
            sample_rate: Some(decoder.rate()),
            channels: Some(decoder.channels()),
            duration: (stream_duration.is_finite() && stream_duration > 0.0).then_some(stream_duration),
        })
    });

    Ok(MediaInfo {
        format_name: input.format().name().to_string(),
        duration,
        size: std::fs::metadata(path)?.len(),
        bitrate: input.bit_rate().max(0) as u64,
        video,
        audio,
    })
}

fn stream_time_base(octx: &format::context::Output, index: usize) -> MediaResult<Rational> {
    octx.stream(index)
        .map(|stream| stream.time_base())
        .ok_or_else(|| MediaError::internal(format!("output stream {} missing", index)))
}

/// Drain every packet the encoder has ready into the muxer.
fn write_packets(
    encoder: &mut encoder::Encoder,
    octx: &mut format::context::Output,
    index: usize,
    from: Rational,
    to: Rational,
) -> MediaResult<()> {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(index);
        packet.rescale_ts(from, to);
        packet.write_interleaved(octx)?;
    }
    Ok(())
}

struct VideoOut {
    encoder: encoder::Video,
    index: usize,
    format: Pixel,
    time_base: Rational,
    stream_time_base: Rational,
}

impl VideoOut {
    fn open(octx: &mut format::context::Output, params: &EncodingParams, global_header: bool) -> MediaResult<Self> {
        let codec = encoder::find_by_name(&params.video_codec)
            .ok_or_else(|| MediaError::LibavUnavailable(format!("video encoder {} is not linked", params.video_codec)))?;
        let format: Pixel = params
            .pixel_format
            .parse()
            .map_err(|_| MediaError::invalid_media(format!("unknown pixel format {}", params.pixel_format)))?;
        let time_base = Rational::new(1, params.frame_rate.max(1) as i32);

        let mut stream = octx.add_stream(codec)?;
        let index = stream.index();

        let mut video = codec::context::Context::new_with_codec(codec).encoder().video()?;
        video.set_width(params.resolution.width);
        video.set_height(params.resolution.height);
        video.set_format(format);
        video.set_time_base(time_base);
        video.set_frame_rate(Some(Rational::new(params.frame_rate.max(1) as i32, 1)));
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = Dictionary::new();
        options.set("preset", params.speed_preset.as_str());
        options.set("crf", &params.crf.to_string());
        if let Some(kbps) = params.video_bitrate_kbps() {
            options.set("maxrate", &format!("{}k", kbps));
            options.set("bufsize", &format!("{}k", kbps.saturating_mul(2)));
        }

        let encoder = video.open_with(options)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        Ok(Self {
            encoder,
            index,
            format,
            time_base,
            stream_time_base: time_base,
        })
    }

    fn send(&mut self, octx: &mut format::context::Output, frame: &VideoFrame) -> MediaResult<()> {
        self.encoder.send_frame(frame)?;
        write_packets(&mut self.encoder, octx, self.index, self.time_base, self.stream_time_base)
    }

    fn finish(&mut self, octx: &mut format::context::Output) -> MediaResult<()> {
        self.encoder.send_eof()?;
        write_packets(&mut self.encoder, octx, self.index, self.time_base, self.stream_time_base)
    }
}

struct AudioOut {
    encoder: encoder::Audio,
    index: usize,
    rate: u32,
    frame_size: usize,
    written: i64,
    time_base: Rational,
    stream_time_base: Rational,
}

impl AudioOut {
    fn open(octx: &mut format::context::Output, params: &EncodingParams, global_header: bool) -> MediaResult<Self> {
        let codec = encoder::find_by_name(&params.audio_codec)
            .ok_or_else(|| MediaError::LibavUnavailable(format!("audio encoder {} is not linked", params.audio_codec)))?;
        let rate = NARRATION_SAMPLE_RATE;
        let time_base = Rational::new(1, rate as i32);

        let mut stream = octx.add_stream(codec)?;
        let index = stream.index();

        let mut audio = codec::context::Context::new_with_codec(codec).encoder().audio()?;
        audio.set_rate(rate as i32);
        audio.set_channel_layout(ChannelLayout::STEREO);
        audio.set_format(SAMPLE_FORMAT);
        audio.set_time_base(time_base);
        if let Some(bps) = bitrate_bps(&params.audio_bitrate) {
            audio.set_bit_rate(bps);
        }
        if global_header {
            audio.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = audio.open_as(codec)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        let frame_size = match encoder.frame_size() {
            0 => DEFAULT_AUDIO_FRAME,
            n => n as usize,
        };

        Ok(Self {
            encoder,
            index,
            rate,
            frame_size,
            written: 0,
            time_base,
            stream_time_base: time_base,
        })
    }

    fn send(&mut self, octx: &mut format::context::Output, left: &[f32], right: &[f32]) -> MediaResult<()> {
        let mut frame = AudioFrame::new(SAMPLE_FORMAT, left.len(), ChannelLayout::STEREO);
        frame.set_rate(self.rate);
        frame.plane_mut::<f32>(0).copy_from_slice(left);
        frame.plane_mut::<f32>(1).copy_from_slice(right);
        frame.set_pts(Some(self.written));
        self.written += left.len() as i64;

        self.encoder.send_frame(&frame)?;
        write_packets(&mut self.encoder, octx, self.index, self.time_base, self.stream_time_base)
    }

    fn finish(&mut self, octx: &mut format::context::Output) -> MediaResult<()> {
        self.encoder.send_eof()?;
        write_packets(&mut self.encoder, octx, self.index, self.time_base, self.stream_time_base)
    }
}

/// RGB24 canvas converted to the encoder's pixel format.
fn encoder_frame(canvas: &Canvas, scaler: &mut scaling::Context, pts: i64) -> MediaResult<VideoFrame> {
    let mut rgb = VideoFrame::new(Pixel::RGB24, canvas.width, canvas.height);
    let stride = rgb.stride(0);
    let row = canvas.width as usize * 3;
    let plane = rgb.data_mut(0);
    for (y, src) in canvas.data.chunks_exact(row).enumerate() {
        plane[y * stride..y * stride + row].copy_from_slice(src);
    }

    let mut out = VideoFrame::empty();
    scaler.run(&rgb, &mut out)?;
    out.set_pts(Some(pts));
    Ok(out)
}

fn next_packet(input: &mut format::context::Input, index: usize) -> Option<Packet> {
    input
        .packets()
        .find(|(stream, _)| stream.index() == index)
        .map(|(_, packet)| packet)
}

enum VisualSource {
    Still(Canvas),
    Video(Box<VideoReader>),
}

impl VisualSource {
    fn frame_at(&mut self, local: f64) -> MediaResult<Canvas> {
        match self {
            VisualSource::Still(canvas) => Ok(canvas.clone()),
            VisualSource::Video(reader) => reader.frame_at(local),
        }
    }
}

/// Sequential decoder that holds the last frame once the stream ends.
struct VideoReader {
    input: format::context::Input,
    index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: scaling::Context,
    time_base: f64,
    start: f64,
    frame_interval: f64,
    fit: (u32, u32),
    target: (u32, u32),
    decoded: u64,
    current: Option<Canvas>,
    pending: Option<(f64, Canvas)>,
    flushed: bool,
    exhausted: bool,
}

impl VideoReader {
    fn open(path: &Path, width: u32, height: u32) -> MediaResult<Self> {
        let input = format::input(&path)?;
        let (index, parameters, time_base, start, frame_interval) = {
            let stream = input
                .streams()
                .best(Type::Video)
                .ok_or_else(|| MediaError::invalid_media(format!("{} has no video stream", path.display())))?;
            let time_base = f64::from(stream.time_base());
            let start = match stream.start_time() {
                ffmpeg::ffi::AV_NOPTS_VALUE => 0.0,
                ts => ts as f64 * time_base,
            };
            let fps = f64::from(stream.avg_frame_rate());
            let frame_interval = if fps.is_finite() && fps > 0.0 { 1.0 / fps } else { 1.0 / 30.0 };
            (stream.index(), stream.parameters(), time_base, start, frame_interval)
        };

        let decoder = codec::context::Context::from_parameters(parameters)?.decoder().video()?;
        let fit = fit_within(decoder.width(), decoder.height(), width, height);
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            fit.0,
            fit.1,
            scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            input,
            index,
            decoder,
            scaler,
            time_base,
            start,
            frame_interval,
            fit,
            target: (width, height),
            decoded: 0,
            current: None,
            pending: None,
            flushed: false,
            exhausted: false,
        })
    }

    /// Latest decoded frame at or before `local`, or the first frame.
    fn frame_at(&mut self, local: f64) -> MediaResult<Canvas> {
        loop {
            if self.pending.is_none() && !self.exhausted {
                match self.decode_next()? {
                    Some(frame) => self.pending = Some(frame),
                    None => self.exhausted = true,
                }
            }
            let advance = match &self.pending {
                Some((pts, _)) => *pts <= local + PTS_EPSILON || self.current.is_none(),
                None => false,
            };
            if !advance {
                break;
            }
            if let Some((_, canvas)) = self.pending.take() {
                self.current = Some(canvas);
            }
        }

        self.current
            .clone()
            .ok_or_else(|| MediaError::invalid_media("no decodable video frames"))
    }

    fn decode_next(&mut self) -> MediaResult<Option<(f64, Canvas)>> {
        let mut decoded = VideoFrame::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let fallback = self.decoded as f64 * self.frame_interval;
                self.decoded += 1;
                let pts = decoded
                    .timestamp()
                    .or(decoded.pts())
                    .map(|ts| ts as f64 * self.time_base - self.start)
                    .unwrap_or(fallback);

                let mut rgb = VideoFrame::empty();
                self.scaler.run(&decoded, &mut rgb)?;
                let fitted = Canvas::from_rgb_rows(self.fit.0, self.fit.1, rgb.data(0), rgb.stride(0));
                return Ok(Some((pts, Canvas::letterbox(&fitted, self.target.0, self.target.1))));
            }

            if self.flushed {
                return Ok(None);
            }
            match next_packet(&mut self.input, self.index) {
                Some(packet) => self.decoder.send_packet(&packet)?,
                None => {
                    self.decoder.send_eof()?;
                    self.flushed = true;
                }
            }
        }
    }
}

/// Decode up to `limit` stereo samples at `rate` from the first audio stream.
fn read_audio(path: &Path, limit: usize, rate: u32, stop: &StopSignal) -> MediaResult<(Vec<f32>, Vec<f32>)> {
    let mut input = format::input(&path)?;
    let (index, parameters) = {
        let stream = input
            .streams()
            .best(Type::Audio)
            .ok_or_else(|| MediaError::invalid_media(format!("{} has no audio stream", path.display())))?;
        (stream.index(), stream.parameters())
    };

    let mut decoder = codec::context::Context::from_parameters(parameters)?.decoder().audio()?;
    let mut resampler = resampling::Context::get(
        decoder.format(),
        decoder.channel_layout(),
        decoder.rate(),
        SAMPLE_FORMAT,
        ChannelLayout::STEREO,
        rate,
    )?;

    let mut left = Vec::with_capacity(limit);
    let mut right = Vec::with_capacity(limit);
    let mut decoded = AudioFrame::empty();
    let mut flushed = false;

    while left.len() < limit {
        stop.check()?;
        if decoder.receive_frame(&mut decoded).is_ok() {
            let mut out = AudioFrame::empty();
            resampler.run(&decoded, &mut out)?;
            left.extend_from_slice(out.plane::<f32>(0));
            right.extend_from_slice(out.plane::<f32>(1));
            continue;
        }
        if flushed {
            break;
        }
        match next_packet(&mut input, index) {
            Some(packet) => decoder.send_packet(&packet)?,
            None => {
                decoder.send_eof()?;
                flushed = true;
            }
        }
    }

    Ok((left, right))
}
