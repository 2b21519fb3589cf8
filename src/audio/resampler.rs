//! Streaming linear resampler and channel mapping for interleaved `f32`
//! audio, used to adapt decoded packets to the output device.

/// Linear-interpolation rate converter that keeps its phase across calls,
/// so consecutive packets join without clicks.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    /// Source frames consumed per output frame
    step: f64,
    /// Read position in source frames, relative to `last_frame`
    pos: f64,
    last_frame: Option<Vec<f32>>,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        let step = if dst_rate == 0 {
            0.0
        } else {
            src_rate as f64 / dst_rate as f64
        };
        Self {
            src_rate,
            dst_rate,
            channels,
            step,
            pos: 0.0,
            last_frame: None,
        }
    }

    /// Forget the carried frame and phase, e.g. after a seek
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.last_frame = None;
    }

    pub fn is_passthrough(&self) -> bool {
        self.src_rate == self.dst_rate
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.src_rate, self.dst_rate)
    }

    /// Resample `input` and append the result to `out`
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let ch = self.channels;
        if ch == 0 || self.src_rate == 0 || self.dst_rate == 0 || input.len() < ch {
            return;
        }
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let in_frames = input.len() / ch;
        let carried = usize::from(self.last_frame.is_some());
        let total = in_frames + carried;
        let frame_at = |i: usize, c: usize, last: &Option<Vec<f32>>| -> f32 {
            match last {
                Some(frame) if i == 0 => frame[c],
                _ => input[(i - carried) * ch + c],
            }
        };

        let expected = (in_frames as f64 / self.step).ceil() as usize + 1;
        out.reserve(expected * ch);

        let last = (total - 1) as f64;
        while self.pos < last {
            let i = self.pos as usize;
            let frac = (self.pos - i as f64) as f32;
            for c in 0..ch {
                let a = frame_at(i, c, &self.last_frame);
                let b = frame_at(i + 1, c, &self.last_frame);
                out.push(a + (b - a) * frac);
            }
            self.pos += self.step;
        }

        let tail = (in_frames - 1) * ch;
        self.last_frame = Some(input[tail..tail + ch].to_vec());
        self.pos -= last;
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(input, &mut out);
        out
    }
}

/// Convert interleaved audio between channel counts. Mono is duplicated into
/// every output channel; a downmix to mono averages the inputs; otherwise
/// extra channels are dropped and missing ones are silent.
pub fn remap_channels(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return input.to_vec();
    }

    let frames = input.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|c| frame.get(c).copied().unwrap_or(0.0)));
        }
    }
    out
}
