//! # Sample Sources
//!
//! A `SampleSource` produces one multi-channel [`Frame`] per call. Two
//! implementations exist, mirroring the two acquisition modes:
//!
//! - [`EmulatedSource`]: synthesizes per-channel sinusoids with a phase
//!   accumulator carried across frames, so waveforms are continuous at
//!   frame boundaries. Used for development and tests.
//! - [`DmaSource`]: pulls one interleaved buffer per call through a
//!   [`RegisterInterface`] (the hardware seam) and demultiplexes it.
//!
//! The concrete FPGA/DMA register implementation lives behind the trait and
//! is out of scope for this crate; tests use a mock.

use crate::acquisition::frame::Frame;
use crate::config::MAX_PACKET_SIZE;

/// Peak amplitude of the emulated sinusoids, in raw sample units.
pub const EMULATED_AMPLITUDE: f64 = 10_000.0;

/// Channel `i` of the emulator runs at `(i + 1) * BASE_FREQUENCY_HZ`.
pub const BASE_FREQUENCY_HZ: f64 = 50.0;

/// Anything that can produce one acquisition frame per call.
///
/// Sources are owned by the sampling loop; a fresh source is built for each
/// session. Errors are transient from the session's point of view: the loop
/// logs them, backs off, and retries.
pub trait SampleSource: Send {
    fn next_frame(&mut self) -> Result<Frame, String>;
}

/// Hardware seam: the acquisition registers and the DMA receive channel.
///
/// `configure` writes the rate and packet-size registers; `read_interleaved`
/// runs one DMA transfer and returns the flat channel-major-per-sample
/// buffer.
pub trait RegisterInterface: Send {
    fn configure(&mut self, sample_rate: u32, packet_size: usize) -> Result<(), String>;
    fn read_interleaved(&mut self, total_samples: usize) -> Result<Vec<i16>, String>;
}

/// Synthetic source: channel `i` is a sinusoid at `50 * (i + 1)` Hz.
///
/// The phase accumulator advances by `chunk_size` modulo `sample_rate` each
/// frame. The emulated frequencies are integer multiples of 1 Hz, so the
/// reduction does not change the waveform and sample `n` of channel `i` is
/// always `round(A * sin(2π * f_i * n / R))` regardless of how the session
/// is chunked.
pub struct EmulatedSource {
    sample_rate: u32,
    chunk_size: usize,
    channel_count: usize,
    phase: u64,
}

impl EmulatedSource {
    pub fn new(sample_rate: u32, chunk_size: usize, channel_count: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
            channel_count,
            phase: 0,
        }
    }

    fn sample(&self, channel: usize, index: u64) -> i16 {
        let frequency = BASE_FREQUENCY_HZ * (channel as f64 + 1.0);
        let angle =
            2.0 * std::f64::consts::PI * frequency * index as f64 / self.sample_rate as f64;
        (EMULATED_AMPLITUDE * angle.sin()).round() as i16
    }
}

impl SampleSource for EmulatedSource {
    fn next_frame(&mut self) -> Result<Frame, String> {
        let mut channels = Vec::with_capacity(self.channel_count);

        for channel in 0..self.channel_count {
            let mut samples = Vec::with_capacity(self.chunk_size);
            for offset in 0..self.chunk_size as u64 {
                samples.push(self.sample(channel, self.phase + offset));
            }
            channels.push(samples);
        }

        self.phase = (self.phase + self.chunk_size as u64) % self.sample_rate as u64;

        Frame::from_channels(channels)
    }
}

/// Builds the source for a session from its resolved parameters.
///
/// The emulator covers development and testing; hardware acquisition needs
/// a concrete [`RegisterInterface`] linked into the binary, which this
/// build does not carry. Wiring one in means swapping this factory at
/// startup, nothing else changes.
pub fn default_source_factory() -> crate::acquisition::controller::SourceFactory {
    std::sync::Arc::new(|params| {
        if params.emulate {
            Ok(Box::new(EmulatedSource::new(
                params.sample_rate,
                params.packet_size,
                params.channel_count,
            )) as Box<dyn SampleSource>)
        } else {
            Err(
                "No hardware register interface is linked into this build; \
                 set acquisition.emulate = true"
                    .to_string(),
            )
        }
    })
}

/// Hardware source: one DMA transfer per frame, demultiplexed server-side.
pub struct DmaSource<R: RegisterInterface> {
    interface: R,
    packet_size: usize,
    channel_count: usize,
}

impl<R: RegisterInterface> DmaSource<R> {
    /// Validate the packet size and program the acquisition registers.
    ///
    /// The range check runs before any register write, so a bad packet size
    /// never reaches the hardware.
    pub fn new(
        mut interface: R,
        sample_rate: u32,
        packet_size: usize,
        channel_count: usize,
    ) -> Result<Self, String> {
        if packet_size > MAX_PACKET_SIZE {
            return Err(format!(
                "packet_size must be between 0 and {}, got {}",
                MAX_PACKET_SIZE, packet_size
            ));
        }

        interface.configure(sample_rate, packet_size)?;

        Ok(Self {
            interface,
            packet_size,
            channel_count,
        })
    }
}

impl<R: RegisterInterface> SampleSource for DmaSource<R> {
    fn next_frame(&mut self) -> Result<Frame, String> {
        let total_samples = self.packet_size * self.channel_count;
        let raw = self.interface.read_interleaved(total_samples)?;

        if raw.len() != total_samples {
            return Err(format!(
                "DMA transfer returned {} samples, expected {}",
                raw.len(),
                total_samples
            ));
        }

        Frame::from_interleaved(&raw, self.channel_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_sample(channel: usize, index: u64, sample_rate: u32) -> i16 {
        let frequency = BASE_FREQUENCY_HZ * (channel as f64 + 1.0);
        let angle = 2.0 * std::f64::consts::PI * frequency * index as f64 / sample_rate as f64;
        (EMULATED_AMPLITUDE * angle.sin()).round() as i16
    }

    #[test]
    fn test_emulator_waveform_matches_formula() {
        let mut source = EmulatedSource::new(1000, 25, 3);
        let frame = source.next_frame().unwrap();

        for channel in 0..3 {
            for (index, &sample) in frame.channel(channel).iter().enumerate() {
                assert_eq!(sample, expected_sample(channel, index as u64, 1000));
            }
        }
    }

    #[test]
    fn test_emulator_phase_continuity_across_frames() {
        // 1000 Hz sample rate with 33-sample chunks: frame boundaries land
        // at awkward offsets, and the phase accumulator wraps mid-stream.
        let mut source = EmulatedSource::new(1000, 33, 2);
        let mut collected: Vec<Vec<i16>> = vec![Vec::new(); 2];

        for _ in 0..40 {
            let frame = source.next_frame().unwrap();
            for channel in 0..2 {
                collected[channel].extend_from_slice(frame.channel(channel));
            }
        }

        for channel in 0..2 {
            for (index, &sample) in collected[channel].iter().enumerate() {
                assert_eq!(
                    sample,
                    expected_sample(channel, index as u64, 1000),
                    "channel {} sample {}",
                    channel,
                    index
                );
            }
        }
    }

    #[test]
    fn test_emulator_zero_chunk() {
        let mut source = EmulatedSource::new(1000, 0, 8);
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.channel_count(), 8);
        assert_eq!(frame.chunk_size(), 0);
    }

    /// Register interface that serves a deterministic interleaved ramp.
    struct MockInterface {
        configured: Option<(u32, usize)>,
    }

    impl MockInterface {
        fn new() -> Self {
            Self { configured: None }
        }
    }

    impl RegisterInterface for MockInterface {
        fn configure(&mut self, sample_rate: u32, packet_size: usize) -> Result<(), String> {
            self.configured = Some((sample_rate, packet_size));
            Ok(())
        }

        fn read_interleaved(&mut self, total_samples: usize) -> Result<Vec<i16>, String> {
            Ok((0..total_samples as i16).collect())
        }
    }

    #[test]
    fn test_dma_source_programs_registers_and_demultiplexes() {
        let source = DmaSource::new(MockInterface::new(), 2000, 4, 8).unwrap();
        assert_eq!(source.interface.configured, Some((2000, 4)));

        let mut source = source;
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.channel_count(), 8);
        assert_eq!(frame.chunk_size(), 4);

        // Ramp 0..32 interleaved over 8 channels: channel i gets i, i+8, ...
        for channel in 0..8usize {
            let expected: Vec<i16> = (0..4).map(|s| (channel + s * 8) as i16).collect();
            assert_eq!(frame.channel(channel), expected.as_slice());
        }
    }

    #[test]
    fn test_dma_source_rejects_oversized_packet_before_register_write() {
        struct PanicInterface;

        impl RegisterInterface for PanicInterface {
            fn configure(&mut self, _: u32, _: usize) -> Result<(), String> {
                panic!("register write must not happen for an invalid packet size");
            }

            fn read_interleaved(&mut self, _: usize) -> Result<Vec<i16>, String> {
                unreachable!()
            }
        }

        let result = DmaSource::new(PanicInterface, 1000, 1024, 8);
        assert!(result.is_err());
    }

    #[test]
    fn test_dma_source_rejects_short_transfer() {
        struct ShortInterface;

        impl RegisterInterface for ShortInterface {
            fn configure(&mut self, _: u32, _: usize) -> Result<(), String> {
                Ok(())
            }

            fn read_interleaved(&mut self, _: usize) -> Result<Vec<i16>, String> {
                Ok(vec![0; 3])
            }
        }

        let mut source = DmaSource::new(ShortInterface, 1000, 4, 8).unwrap();
        assert!(source.next_frame().is_err());
    }
}
