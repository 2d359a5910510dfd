//! Electrode excitation schedule and delta-voltage extraction.
//!
//! One excitation state grounds electrode `g` and drives current into
//! `(g + 1) % 16`. The remaining 14 electrodes, read starting just past the
//! current electrode and wrapping around, form the valid window; adjacent
//! window entries give 13 delta-voltages per state and 208 per full scan.
//!
//! Everything here is pure. The acquisition task owns all state.

use crate::config::{
    CHANNELS_PER_CONVERTER, DELTAS_PER_STATE, ELECTRODE_COUNT, MEASUREMENT_LEN, WINDOW_LEN,
};

/// 16 readings in electrode order.
pub type RawChannels = [f32; ELECTRODE_COUNT];
/// Deltas produced by a single excitation state.
pub type StateDeltas = [f32; DELTAS_PER_STATE];
/// One complete measurement.
pub type Measurement = [f32; MEASUREMENT_LEN];

/// Number of outputs on the current-source driver.
pub const CURRENT_SOURCE_CHANNELS: u8 = 24;

const COUNT: u8 = ELECTRODE_COUNT as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub struct ExcitationState {
    pub ground: u8,
    pub current: u8,
}

impl ExcitationState {
    /// The state a scan cycle starts from.
    pub const fn first() -> Self {
        Self::with_ground(0)
    }

    pub const fn with_ground(ground: u8) -> Self {
        let ground = ground % COUNT;
        Self {
            ground,
            current: (ground + 1) % COUNT,
        }
    }

    /// First slot of this state's deltas in a [`Measurement`].
    pub const fn offset(&self) -> usize {
        self.ground as usize * DELTAS_PER_STATE
    }
}

/// Advance the schedule by one electrode.
pub fn next_excitation_state(current_ground: u8) -> ExcitationState {
    ExcitationState::with_ground((current_ground % COUNT + 1) % COUNT)
}

/// Electrode read at window position `i` while `current` is driven.
#[inline]
pub fn window_index(current: u8, i: usize) -> usize {
    (current as usize + 1 + i) % ELECTRODE_COUNT
}

/// Differences of consecutive valid-window readings.
pub fn extract_deltas(raw: &RawChannels, current: u8) -> StateDeltas {
    let mut window = [0.0f32; WINDOW_LEN];
    for (i, slot) in window.iter_mut().enumerate() {
        *slot = raw[window_index(current, i)];
    }

    let mut deltas = [0.0f32; DELTAS_PER_STATE];
    for (i, delta) in deltas.iter_mut().enumerate() {
        *delta = window[i + 1] - window[i];
    }
    deltas
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum Converter {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum MapError {
    WrongLength,
    Parse,
    OutOfRange(u8),
    Duplicate(u8),
}

/// Physical wiring of the electrode array.
///
/// For each converter, which electrode is wired to channel 0..7, and for
/// each electrode, which current-source output feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectrodeMap {
    converter_electrodes: [[u8; CHANNELS_PER_CONVERTER]; 2],
    current_channels: [u8; ELECTRODE_COUNT],
}

impl Default for ElectrodeMap {
    /// Electrodes 0..7 on converter A and 8..15 on converter B, each in
    /// descending channel order; current output N feeds electrode N.
    fn default() -> Self {
        let mut converter_electrodes = [[0u8; CHANNELS_PER_CONVERTER]; 2];
        for ch in 0..CHANNELS_PER_CONVERTER {
            converter_electrodes[0][ch] = (CHANNELS_PER_CONVERTER - 1 - ch) as u8;
            converter_electrodes[1][ch] = (2 * CHANNELS_PER_CONVERTER - 1 - ch) as u8;
        }
        let mut current_channels = [0u8; ELECTRODE_COUNT];
        for (electrode, ch) in current_channels.iter_mut().enumerate() {
            *ch = electrode as u8;
        }
        Self {
            converter_electrodes,
            current_channels,
        }
    }
}

impl ElectrodeMap {
    /// Build a map from comma-separated lists: electrodes on converter A
    /// channels 0..7, electrodes on converter B channels 0..7, and the
    /// current-source output for electrodes 0..15.
    pub fn from_lists(
        converter_a: &str,
        converter_b: &str,
        current: &str,
    ) -> Result<Self, MapError> {
        let a: [u8; CHANNELS_PER_CONVERTER] = parse_list(converter_a, COUNT)?;
        let b: [u8; CHANNELS_PER_CONVERTER] = parse_list(converter_b, COUNT)?;
        let current_channels: [u8; ELECTRODE_COUNT] = parse_list(current, CURRENT_SOURCE_CHANNELS)?;

        let mut seen = [false; ELECTRODE_COUNT];
        for &electrode in a.iter().chain(b.iter()) {
            if seen[electrode as usize] {
                return Err(MapError::Duplicate(electrode));
            }
            seen[electrode as usize] = true;
        }

        let mut outputs = [false; CURRENT_SOURCE_CHANNELS as usize];
        for &ch in current_channels.iter() {
            if outputs[ch as usize] {
                return Err(MapError::Duplicate(ch));
            }
            outputs[ch as usize] = true;
        }

        Ok(Self {
            converter_electrodes: [a, b],
            current_channels,
        })
    }

    /// Electrode wired to `channel` of `converter`.
    pub fn electrode(&self, converter: Converter, channel: u8) -> usize {
        let row = match converter {
            Converter::A => 0,
            Converter::B => 1,
        };
        self.converter_electrodes[row][channel as usize % CHANNELS_PER_CONVERTER] as usize
    }

    /// Current-source output feeding `electrode`.
    pub fn current_channel(&self, electrode: u8) -> u8 {
        self.current_channels[electrode as usize % ELECTRODE_COUNT]
    }
}

fn parse_list<const N: usize>(list: &str, limit: u8) -> Result<[u8; N], MapError> {
    let mut out = [0u8; N];
    let mut len = 0;
    for field in list.split(',') {
        if len == N {
            return Err(MapError::WrongLength);
        }
        let value: u8 = field.trim().parse().map_err(|_| MapError::Parse)?;
        if value >= limit {
            return Err(MapError::OutOfRange(value));
        }
        out[len] = value;
        len += 1;
    }
    if len != N {
        return Err(MapError::WrongLength);
    }
    Ok(out)
}
