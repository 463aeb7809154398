//! # Frames and Demultiplexing
//!
//! One `Frame` is a synchronized multi-channel batch of signed 16-bit
//! samples produced by a single acquisition step. The acquisition hardware
//! delivers one flat interleaved buffer per transfer (sample 0 of every
//! channel, then sample 1 of every channel, ...); `Frame::from_interleaved`
//! untangles it into per-channel sequences with plain stride extraction.
//!
//! ## Wire format:
//! `to_wire_bytes` serializes the frame as `channel_count * chunk_size`
//! 16-bit little-endian integers, per-channel contiguous (all of channel 0,
//! then all of channel 1, ...). This is NOT the interleaved hardware layout;
//! demultiplexing happens server-side so receivers only need to know the
//! channel count to reshape the buffer.

use actix_web::web::Bytes;
use byteorder::{LittleEndian, WriteBytesExt};

/// A synchronized multi-channel batch of samples.
///
/// Invariant: every channel holds the same number of samples, and every
/// frame in a session has the same channel count and chunk size.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    channels: Vec<Vec<i16>>,
}

impl Frame {
    /// Build a frame from already-separated per-channel sequences.
    ///
    /// Fails when no channels are given or the channel lengths differ.
    pub fn from_channels(channels: Vec<Vec<i16>>) -> Result<Self, String> {
        let first_len = match channels.first() {
            Some(first) => first.len(),
            None => return Err("Frame must have at least one channel".to_string()),
        };

        if channels.iter().any(|channel| channel.len() != first_len) {
            return Err("All channels in a frame must have the same length".to_string());
        }

        Ok(Self { channels })
    }

    /// Demultiplex one interleaved hardware buffer into a frame.
    ///
    /// The buffer is channel-major per sample: `[c0s0, c1s0, ..., c7s0,
    /// c0s1, ...]`. Channel `i`'s sequence is every `channel_count`-th
    /// element starting at offset `i`.
    pub fn from_interleaved(raw: &[i16], channel_count: usize) -> Result<Self, String> {
        if channel_count == 0 {
            return Err("Channel count must be greater than 0".to_string());
        }

        if raw.len() % channel_count != 0 {
            return Err(format!(
                "Interleaved buffer length {} is not a multiple of the channel count {}",
                raw.len(),
                channel_count
            ));
        }

        let chunk_size = raw.len() / channel_count;
        let mut channels = Vec::with_capacity(channel_count);

        for offset in 0..channel_count {
            let mut channel = Vec::with_capacity(chunk_size);
            let mut index = offset;
            while index < raw.len() {
                channel.push(raw[index]);
                index += channel_count;
            }
            channels.push(channel);
        }

        Ok(Self { channels })
    }

    /// Number of channels in this frame.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel in this frame.
    pub fn chunk_size(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> &[i16] {
        &self.channels[index]
    }

    /// Per-channel sample sequences, in channel order.
    pub fn channels(&self) -> &[Vec<i16>] {
        &self.channels
    }

    /// Serialize to the wire payload: per-channel contiguous i16 LE.
    ///
    /// The payload is built once per frame and shared between subscribers,
    /// so every subscriber receives byte-identical data.
    pub fn to_wire_bytes(&self) -> Bytes {
        let mut payload = Vec::with_capacity(self.channel_count() * self.chunk_size() * 2);

        for channel in &self.channels {
            for &sample in channel {
                // Writing into a Vec cannot fail.
                payload.write_i16::<LittleEndian>(sample).expect("write to Vec");
            }
        }

        Bytes::from(payload)
    }
}
